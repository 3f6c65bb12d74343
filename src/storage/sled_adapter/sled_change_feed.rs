use async_trait::async_trait;
use sled::Event;
use sled::Subscriber;
use tracing::trace;

use super::POINTER_KEY;
use crate::storage::decode;
use crate::AppKey;
use crate::ChangeFeed;
use crate::FeedError;
use crate::FeedEvent;
use crate::PointerFields;
use crate::PointerRecord;
use crate::Result;

/// Change feed over a sled prefix subscription on the pointer key.
///
/// Sled reports whole values, so the feed keeps the last record it saw and
/// turns every write into an insert (first sighting) or an update
/// carrying the changed fields.
pub struct SledChangeFeed {
    key: AppKey,
    subscriber: Subscriber,
    last_seen: Option<PointerRecord>,
}

impl SledChangeFeed {
    pub(crate) fn new(
        key: AppKey,
        subscriber: Subscriber,
        last_seen: Option<PointerRecord>,
    ) -> Self {
        Self {
            key,
            subscriber,
            last_seen,
        }
    }

    fn translate(
        &mut self,
        event: Event,
    ) -> Result<FeedEvent> {
        match event {
            Event::Insert { key, value } => {
                if key[..] != POINTER_KEY[..] {
                    return Err(FeedError::MalformedEvent(format!(
                        "{}: unexpected key {:?}",
                        self.key, key
                    ))
                    .into());
                }
                let pointer: PointerRecord = decode(&value).map_err(|e| {
                    FeedError::MalformedEvent(format!("{}: {:?}", self.key, e))
                })?;
                let event = match self.last_seen {
                    None => FeedEvent::Insert {
                        full_document: pointer,
                    },
                    Some(previous) => FeedEvent::Update {
                        updated_fields: changed_fields(&previous, &pointer),
                    },
                };
                self.last_seen = Some(pointer);
                Ok(event)
            }
            Event::Remove { .. } => {
                self.last_seen = None;
                Ok(FeedEvent::Delete)
            }
        }
    }
}

/// `cur_index` is always reported together with a moved `op_num`.
pub(crate) fn changed_fields(
    previous: &PointerRecord,
    next: &PointerRecord,
) -> PointerFields {
    let op_moved = previous.op_num != next.op_num;
    PointerFields {
        cur_index: (op_moved || previous.cur_index != next.cur_index).then_some(next.cur_index),
        max_index: (previous.max_index != next.max_index).then_some(next.max_index),
        op_num: op_moved.then_some(next.op_num),
    }
}

#[async_trait]
impl ChangeFeed for SledChangeFeed {
    async fn next_event(&mut self) -> Option<Result<FeedEvent>> {
        let event = (&mut self.subscriber).await?;
        let event = self.translate(event);
        trace!(app = %self.key, ?event, "change feed event");
        Some(event)
    }
}
