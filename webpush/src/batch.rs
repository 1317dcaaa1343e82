use database::{
    Notification, StoreError, SubscriptionRecord, SubscriptionStore, SUBSCRIPTION_PREFIX,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    dispatch::{truncate, Dispatcher, Verdict},
    filter::DispatchFilter,
};

/// Keys requested per `list` call.
pub const PAGE_SIZE: usize = 1000;
/// Upper bound on pages consumed by one batch.
pub const MAX_PAGES: usize = 50;
/// Failures beyond this many are counted but not itemised.
pub const MAX_REPORTED_FAILURES: usize = 20;

const ENDPOINT_SNIPPET_CHARS: usize = 60;
const ERROR_SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub total: usize,
    pub sent: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<FailureEntry>,
}

impl DispatchReport {
    fn record_failure(&mut self, endpoint: &str, status: Option<u16>, error: Option<&str>) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_FAILURES {
            self.errors.push(FailureEntry {
                endpoint: truncate(endpoint, ENDPOINT_SNIPPET_CHARS).to_owned(),
                status,
                error: error.map(|e| truncate(e, ERROR_SNIPPET_CHARS).to_owned()),
            });
        }
    }
}

/// Sends to every stored subscription matching `filter`, one at a time in
/// listing order, deleting subscriptions the push service reports as gone.
///
/// Only a failing `list` aborts the batch. Unreadable or unparsable records
/// and filter misses are counted as skipped.
pub async fn run_batch<F>(
    store: &dyn SubscriptionStore,
    dispatcher: &Dispatcher,
    filter: &DispatchFilter,
    payload_for: F,
) -> Result<DispatchReport, StoreError>
where
    F: Fn(&SubscriptionRecord) -> Option<Notification>,
{
    let mut report = DispatchReport::default();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let page = store
            .list(SUBSCRIPTION_PREFIX, cursor.as_deref(), PAGE_SIZE)
            .await?;

        for key in &page.keys {
            report.total += 1;

            let Some(record) = load_record(store, key).await else {
                report.skipped += 1;
                continue;
            };
            if !filter.matches(&record) {
                report.skipped += 1;
                continue;
            }

            let payload = payload_for(&record);
            let outcome = dispatcher
                .send_one(&record.subscription, payload.as_ref())
                .await;
            let endpoint = record.endpoint();

            match outcome.verdict {
                Verdict::Delivered => report.sent += 1,
                Verdict::Gone => match store.delete(key).await {
                    Ok(()) => {
                        info!(
                            "Removed expired subscription {} ({:?}).",
                            truncate(endpoint, ENDPOINT_SNIPPET_CHARS),
                            outcome.status
                        );
                        report.removed += 1;
                    }
                    Err(err) => {
                        warn!("Failed to remove expired subscription {}: {}", key, err);
                        report.record_failure(
                            endpoint,
                            outcome.status,
                            Some(&format!("delete failed: {err}")),
                        );
                    }
                },
                Verdict::Rejected | Verdict::TransportFailure => {
                    warn!(
                        r#"Sent notification failed to: {}. Status: {:?}. Reason: "{}"."#,
                        truncate(endpoint, ENDPOINT_SNIPPET_CHARS),
                        outcome.status,
                        outcome.detail.as_deref().unwrap_or_default()
                    );
                    report.record_failure(endpoint, outcome.status, outcome.detail.as_deref());
                }
            }
        }

        if page.list_complete {
            break;
        }
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    info!(
        "Batch finished: total={} sent={} removed={} skipped={} failed={}",
        report.total, report.sent, report.removed, report.skipped, report.failed
    );

    Ok(report)
}

async fn load_record(store: &dyn SubscriptionStore, key: &str) -> Option<SubscriptionRecord> {
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("Skipping {}: record vanished.", key);
            return None;
        }
        Err(err) => {
            debug!("Skipping {}: {}", key, err);
            return None;
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(record) => Some(record),
        Err(err) => {
            debug!("Skipping {}: unparsable record: {}", key, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use database::{DeliveryMode, ListPage, MemoryStore, SubscribeData};

    use super::*;
    use crate::{
        transport::{PushRequest, PushResponse, PushTransport},
        vapid::{VapidConfig, VapidKeyPair},
    };

    /// Answers per endpoint: `Some(status)` responds, `None` fails the connection.
    #[derive(Default)]
    struct ScriptedTransport {
        script: HashMap<String, Option<u16>>,
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn respond(mut self, endpoint: &str, status: Option<u16>) -> Self {
            self.script.insert(endpoint.to_owned(), status);
            self
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn post(&self, request: PushRequest) -> anyhow::Result<PushResponse> {
            self.sent.lock().unwrap().push(request.endpoint.clone());
            match self.script.get(&request.endpoint).copied().unwrap_or(Some(201)) {
                Some(status) => Ok(PushResponse {
                    status,
                    body: "push service says no".into(),
                }),
                None => anyhow::bail!("connection refused"),
            }
        }
    }

    fn dispatcher(transport: Arc<ScriptedTransport>) -> Dispatcher {
        let vapid = VapidConfig {
            keys: VapidKeyPair::generate(),
            subject: "mailto:ops@example.com".into(),
        };
        Dispatcher::new(vapid, transport)
    }

    async fn store_record(
        store: &MemoryStore,
        endpoint: &str,
        places: &[&str],
        hour: Option<u8>,
    ) -> String {
        let record = SubscriptionRecord::new(
            SubscribeData::new(endpoint),
            if places.is_empty() {
                DeliveryMode::All
            } else {
                DeliveryMode::Selected
            },
            places.iter().map(|p| p.to_string()).collect(),
            hour,
        );
        store.put_record(&record).await.unwrap()
    }

    #[tokio::test]
    async fn it_should_reconcile_gone_delivered_and_failed() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let gone = store_record(&store, "https://push.example.net/gone", &[], None).await;
        let ok = store_record(&store, "https://push.example.net/ok", &[], None).await;
        let down = store_record(&store, "https://push.example.net/down", &[], None).await;

        let transport = Arc::new(
            ScriptedTransport::default()
                .respond("https://push.example.net/gone", Some(410))
                .respond("https://push.example.net/ok", Some(200))
                .respond("https://push.example.net/down", None),
        );
        let dispatcher = dispatcher(transport.clone());

        let report = run_batch(&store, &dispatcher, &DispatchFilter::default(), |_| None).await?;

        assert_eq!(report.total, 3);
        assert_eq!(report.sent, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(
            report.errors,
            vec![FailureEntry {
                endpoint: "https://push.example.net/down".into(),
                status: None,
                error: Some("connection refused".into()),
            }]
        );

        assert!(!store.contains(&gone));
        assert!(store.contains(&ok));
        assert!(store.contains(&down));
        assert_eq!(transport.sent().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn it_should_keep_rejected_subscriptions() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let key = store_record(&store, "https://push.example.net/bad", &[], None).await;
        let transport = Arc::new(
            ScriptedTransport::default().respond("https://push.example.net/bad", Some(403)),
        );

        let report = run_batch(
            &store,
            &dispatcher(transport),
            &DispatchFilter::default(),
            |_| None,
        )
        .await?;

        assert_eq!(report.failed, 1);
        assert_eq!(report.removed, 0);
        assert_eq!(report.errors[0].status, Some(403));
        assert_eq!(report.errors[0].error.as_deref(), Some("push service says no"));
        assert!(store.contains(&key));
        Ok(())
    }

    #[tokio::test]
    async fn it_should_skip_unparsable_records() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.put("sub:broken", b"{not json").await?;
        store.put("sub:no-endpoint", br#"{"subscription": {}}"#).await?;
        let transport = Arc::new(ScriptedTransport::default());

        let report = run_batch(
            &store,
            &dispatcher(transport.clone()),
            &DispatchFilter::default(),
            |_| None,
        )
        .await?;

        assert_eq!(report.total, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.sent, 0);
        assert!(transport.sent().is_empty());
        assert!(store.contains("sub:broken"));
        assert!(store.contains("sub:no-endpoint"));
        Ok(())
    }

    #[tokio::test]
    async fn it_should_only_send_to_matching_records() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store_record(&store, "https://push.example.net/a18", &["A"], Some(18)).await;
        store_record(&store, "https://push.example.net/b18", &["B"], Some(18)).await;
        store_record(&store, "https://push.example.net/any", &[], None).await;
        let transport = Arc::new(ScriptedTransport::default());

        let report = run_batch(
            &store,
            &dispatcher(transport.clone()),
            &DispatchFilter::new(Some("A".into()), Some(18)),
            |_| None,
        )
        .await?;

        assert_eq!(report.total, 3);
        assert_eq!(report.sent, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(transport.sent(), vec!["https://push.example.net/a18"]);
        Ok(())
    }

    /// Serves at most two keys per page regardless of the requested limit.
    struct SmallPages(MemoryStore);

    #[async_trait]
    impl SubscriptionStore for SmallPages {
        async fn list(
            &self,
            prefix: &str,
            cursor: Option<&str>,
            _limit: usize,
        ) -> Result<ListPage, StoreError> {
            self.0.list(prefix, cursor, 2).await
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.0.get(key).await
        }

        async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            self.0.put(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).await
        }
    }

    /// Never reports completion; every page holds one key that has no value.
    struct EndlessStore;

    #[async_trait]
    impl SubscriptionStore for EndlessStore {
        async fn list(
            &self,
            prefix: &str,
            cursor: Option<&str>,
            _limit: usize,
        ) -> Result<ListPage, StoreError> {
            let next = format!("{prefix}{}", cursor.map_or(0, str::len));
            Ok(ListPage {
                keys: vec![next.clone()],
                cursor: Some(format!("{}x", cursor.unwrap_or_default())),
                list_complete: false,
            })
        }

        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        async fn put(&self, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn it_should_consume_every_page() -> anyhow::Result<()> {
        let store = SmallPages(MemoryStore::new());
        for i in 0..5 {
            store_record(&store.0, &format!("https://push.example.net/{i}"), &[], None).await;
        }
        let transport = Arc::new(ScriptedTransport::default());

        let report = run_batch(
            &store,
            &dispatcher(transport.clone()),
            &DispatchFilter::default(),
            |_| None,
        )
        .await?;

        assert_eq!(report.total, 5);
        assert_eq!(report.sent, 5);
        assert_eq!(transport.sent().len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn it_should_stop_at_the_page_ceiling() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::default());

        let report = run_batch(
            &EndlessStore,
            &dispatcher(transport),
            &DispatchFilter::default(),
            |_| None,
        )
        .await?;

        assert_eq!(report.total, MAX_PAGES);
        assert_eq!(report.skipped, MAX_PAGES);
        Ok(())
    }

    #[tokio::test]
    async fn it_should_bound_the_failure_list() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut transport = ScriptedTransport::default();
        let long_endpoint = format!("https://push.example.net/{}", "x".repeat(100));
        for i in 0..(MAX_REPORTED_FAILURES + 3) {
            let endpoint = format!("{long_endpoint}{i}");
            store_record(&store, &endpoint, &[], None).await;
            transport = transport.respond(&endpoint, Some(500));
        }

        let report = run_batch(
            &store,
            &dispatcher(Arc::new(transport)),
            &DispatchFilter::default(),
            |_| None,
        )
        .await?;

        assert_eq!(report.failed, MAX_REPORTED_FAILURES + 3);
        assert_eq!(report.errors.len(), MAX_REPORTED_FAILURES);
        assert!(report
            .errors
            .iter()
            .all(|entry| entry.endpoint.chars().count() == 60));
        Ok(())
    }

    #[tokio::test]
    async fn it_should_build_payloads_per_record() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store_record(&store, "https://push.example.net/1", &["A"], None).await;
        let transport = Arc::new(ScriptedTransport::default());
        let seen = Mutex::new(Vec::new());

        run_batch(
            &store,
            &dispatcher(transport),
            &DispatchFilter::default(),
            |record| {
                seen.lock().unwrap().push(record.places.clone());
                Some(Notification::new("t", "b", "/"))
            },
        )
        .await?;

        assert_eq!(seen.into_inner().unwrap(), vec![vec!["A".to_string()]]);
        Ok(())
    }
}
