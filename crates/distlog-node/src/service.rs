//! Log service facade
//!
//! [`LogService`] puts authorization in front of a [`CommitLog`] and exposes
//! it through the [`LogApi`] contract, which is what the TCP server and the
//! replicator talk to.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, instrument};

use distlog_core::{
    Authorizer, CONSUME_ACTION, CallerIdentity, LogApi, OffsetStream, PRODUCE_ACTION, Record,
    RecordStream, ServiceError, ServiceResult, ValueStream, WILDCARD,
};
use distlog_storage::{CommitLog, StorageError};

/// Map a storage failure onto the service contract
pub fn service_error(err: StorageError) -> ServiceError {
    match err {
        StorageError::OffsetOutOfRange { offset } => ServiceError::OffsetOutOfRange { offset },
        StorageError::Corruption(message) => ServiceError::Corruption(message),
        StorageError::Closed => ServiceError::Unavailable("log is closed".to_string()),
        other => ServiceError::storage(other.to_string()),
    }
}

/// Authorizing front for a commit log
#[derive(Clone)]
pub struct LogService {
    log: Arc<CommitLog>,
    authorizer: Arc<dyn Authorizer>,
}

impl LogService {
    /// Wrap `log`, checking every request against `authorizer`
    pub fn new(log: Arc<CommitLog>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { log, authorizer }
    }

    /// The underlying log
    pub fn log(&self) -> &Arc<CommitLog> {
        &self.log
    }

    fn authorize(&self, caller: &CallerIdentity, action: &str) -> ServiceResult<()> {
        self.authorizer
            .authorize(caller.as_str(), WILDCARD, action)
            .map_err(ServiceError::from)
    }

    fn append(&self, caller: &CallerIdentity, value: Bytes) -> ServiceResult<u64> {
        self.authorize(caller, PRODUCE_ACTION)?;
        self.log.append(Record::new(value)).map_err(service_error)
    }
}

impl std::fmt::Debug for LogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogService")
            .field("dir", &self.log.dir())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogApi for LogService {
    #[instrument(skip(self, value), fields(caller = %caller, len = value.len()))]
    async fn produce(&self, caller: &CallerIdentity, value: Bytes) -> ServiceResult<u64> {
        let offset = self.append(caller, value)?;
        debug!(offset, "Produced record");
        Ok(offset)
    }

    #[instrument(skip(self), fields(caller = %caller))]
    async fn consume(&self, caller: &CallerIdentity, offset: u64) -> ServiceResult<Record> {
        self.authorize(caller, CONSUME_ACTION)?;
        self.log.read(offset).map_err(service_error)
    }

    async fn produce_stream(
        &self,
        caller: &CallerIdentity,
        mut values: ValueStream,
    ) -> ServiceResult<OffsetStream> {
        self.authorize(caller, PRODUCE_ACTION)?;
        let service = self.clone();
        let caller = caller.clone();

        Ok(Box::pin(async_stream::stream! {
            while let Some(value) = values.next().await {
                let result = service.append(&caller, value);
                let failed = result.is_err();
                yield result;
                if failed {
                    break;
                }
            }
        }))
    }

    async fn consume_stream(
        &self,
        caller: &CallerIdentity,
        offset: u64,
    ) -> ServiceResult<RecordStream> {
        self.authorize(caller, CONSUME_ACTION)?;
        let log = Arc::clone(&self.log);
        let mut tail = log.subscribe();
        debug!(caller = %caller, offset, "Opened consume stream");

        Ok(Box::pin(async_stream::stream! {
            let mut offset = offset;
            loop {
                // An append racing the read below must still wake the wait
                tail.mark_unchanged();

                match log.read(offset) {
                    Ok(record) => {
                        yield Ok(record);
                        offset += 1;
                    }
                    // Anything at or above the floor is not written yet
                    Err(StorageError::OffsetOutOfRange { .. }) => match log.lowest_offset() {
                        Ok(lowest) if offset < lowest => {
                            yield Err(ServiceError::OffsetOutOfRange { offset });
                            break;
                        }
                        Ok(_) => {
                            if tail.changed().await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            yield Err(service_error(e));
                            break;
                        }
                    },
                    Err(e) => {
                        yield Err(service_error(e));
                        break;
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use distlog_core::{AclAuthorizer, AclRule, AllowAll};
    use distlog_storage::LogConfig;
    use futures::stream;
    use tempfile::TempDir;

    use super::*;

    fn open_service(dir: &TempDir, authorizer: Arc<dyn Authorizer>) -> LogService {
        let log = CommitLog::open(dir.path(), LogConfig::default()).unwrap();
        LogService::new(Arc::new(log), authorizer)
    }

    fn root() -> CallerIdentity {
        CallerIdentity::new("root")
    }

    fn root_only() -> Arc<dyn Authorizer> {
        Arc::new(
            AclAuthorizer::default()
                .with_rule(AclRule::new("root", "*", "produce"))
                .with_rule(AclRule::new("root", "*", "consume")),
        )
    }

    #[tokio::test]
    async fn test_produce_consume_hello_world() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(AllowAll));

        let offset = service
            .produce(&root(), Bytes::from_static(b"hello world"))
            .await
            .unwrap();
        assert_eq!(offset, 0);

        let record = service.consume(&root(), offset).await.unwrap();
        assert_eq!(record, Record::new("hello world").with_offset(0));
    }

    #[tokio::test]
    async fn test_consume_past_boundary() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(AllowAll));
        service.produce(&root(), Bytes::from_static(b"a")).await.unwrap();
        service.produce(&root(), Bytes::from_static(b"b")).await.unwrap();

        let err = service.consume(&root(), 2).await.unwrap_err();
        assert_eq!(err, ServiceError::OffsetOutOfRange { offset: 2 });
    }

    #[tokio::test]
    async fn test_denied_without_side_effect() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, root_only());
        let nobody = CallerIdentity::new("nobody");

        let err = service
            .produce(&nobody, Bytes::from_static(b"nope"))
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert!(service.log().is_empty().unwrap());

        assert!(service.consume(&nobody, 0).await.unwrap_err().is_permission_denied());
        assert!(service.consume_stream(&nobody, 0).await.is_err());

        service.produce(&root(), Bytes::from_static(b"yes")).await.unwrap();
        assert_eq!(service.log().next_offset().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_produce_stream_offsets() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(AllowAll));

        let values = ["first", "second", "third"].map(|s| Bytes::from_static(s.as_bytes()));
        let values = stream::iter(values).boxed();
        let offsets: Vec<u64> = service
            .produce_stream(&root(), values)
            .await
            .unwrap()
            .map(|offset| offset.unwrap())
            .collect()
            .await;
        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_consume_stream_tails() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(AllowAll));
        service.produce(&root(), Bytes::from_static(b"first")).await.unwrap();

        let mut records = service.consume_stream(&root(), 0).await.unwrap();
        let first = records.next().await.unwrap().unwrap();
        assert_eq!(first.value.as_ref(), b"first");

        let producer = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            producer
                .produce(&root(), Bytes::from_static(b"second"))
                .await
                .unwrap();
        });

        let second = tokio::time::timeout(Duration::from_secs(5), records.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(second, Record::new("second").with_offset(1));
    }

    #[test]
    fn test_consume_stream_waits_for_append() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(AllowAll));
        let mut records = tokio_test::block_on(service.consume_stream(&root(), 0)).unwrap();

        let mut next = tokio_test::task::spawn(records.next());
        tokio_test::assert_pending!(next.poll());

        service.log().append(Record::new("late")).unwrap();
        assert!(next.is_woken());
        let record = tokio_test::assert_ready!(next.poll()).unwrap().unwrap();
        assert_eq!(record, Record::new("late").with_offset(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_consume_streams_keep_up_with_concurrent_writer() {
        const COUNT: usize = 1000;
        const READERS: usize = 4;

        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(AllowAll));

        let mut readers = Vec::new();
        for _ in 0..READERS {
            let records = service.consume_stream(&root(), 0).await.unwrap();
            readers.push(tokio::spawn(async move {
                records.take(COUNT).collect::<Vec<_>>().await
            }));
        }

        let log = Arc::clone(service.log());
        let writer = std::thread::spawn(move || {
            for i in 0..COUNT {
                log.append(Record::new(format!("value-{}", i))).unwrap();
            }
        });

        for reader in readers {
            let records = tokio::time::timeout(Duration::from_secs(30), reader)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(records.len(), COUNT);
            for (expected, record) in records.into_iter().enumerate() {
                let record = record.unwrap();
                assert_eq!(record.offset, expected as u64);
                assert_eq!(record.value.as_ref(), format!("value-{}", expected).as_bytes());
            }
        }
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn test_consume_stream_below_floor() {
        let dir = TempDir::new().unwrap();
        // 21-byte frames put four records in each segment
        let log = CommitLog::open(dir.path(), LogConfig::with_limits(64, 1024)).unwrap();
        let service = LogService::new(Arc::new(log), Arc::new(AllowAll));

        for _ in 0..10 {
            service
                .produce(&root(), Bytes::from_static(b"padding-padding"))
                .await
                .unwrap();
        }
        service.log().truncate(4).unwrap();
        assert_eq!(service.log().lowest_offset().unwrap(), 4);

        let mut records = service.consume_stream(&root(), 0).await.unwrap();
        let err = records.next().await.unwrap().unwrap_err();
        assert_eq!(err, ServiceError::OffsetOutOfRange { offset: 0 });
        assert!(records.next().await.is_none());
    }

    #[tokio::test]
    async fn test_consume_stream_ends_on_close() {
        let dir = TempDir::new().unwrap();
        let service = open_service(&dir, Arc::new(AllowAll));
        let mut records = service.consume_stream(&root(), 0).await.unwrap();

        let log = Arc::clone(service.log());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            log.close().unwrap();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), records.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            service_error(StorageError::OffsetOutOfRange { offset: 7 }),
            ServiceError::OffsetOutOfRange { offset: 7 }
        );
        assert!(matches!(
            service_error(StorageError::corruption("bad")),
            ServiceError::Corruption(_)
        ));
        assert!(matches!(
            service_error(StorageError::Closed),
            ServiceError::Unavailable(_)
        ));
        assert!(matches!(
            service_error(StorageError::IndexFull),
            ServiceError::Storage(_)
        ));
    }
}
