mod http_api;
mod sdk_sync;
