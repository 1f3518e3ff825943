//! Lazy asset resolution.
//!
//! Asset bytes are pulled through an [`AssetFetcher`] only when the renderer
//! reaches them, with a bounded number of fetches in flight and a timeout on
//! each.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use dossier_shared::{AssetError, AssetHandle, AssetRef, NodeId, RenderError, Warning, WarningCategory};

/// Source of asset bytes, keyed by the opaque token in [`AssetHandle::Token`].
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, token: &str) -> Result<Vec<u8>, AssetError>;
}

/// Fetcher for offline exports: every asset is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

#[async_trait]
impl AssetFetcher for OfflineFetcher {
    async fn fetch(&self, token: &str) -> Result<Vec<u8>, AssetError> {
        Err(AssetError::NotFound(format!("offline export, not fetched: {token}")))
    }
}

/// How an asset ends up in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Bytes embedded as a file attachment.
    Embedded(Vec<u8>),
    /// Not embedded; rendered as a download link.
    Linked(String),
    /// Not embedded and nothing to link to; the caption alone is shown.
    Listed,
    /// Placeholder in place of the content.
    Unavailable(String),
}

/// Limits applied while resolving assets.
#[derive(Debug, Clone, Copy)]
pub struct AssetPolicy {
    pub embed: bool,
    pub max_embed_bytes: u64,
    pub concurrency: usize,
    pub timeout: Duration,
}

/// One asset occurrence on a page.
#[derive(Debug, Clone)]
pub(crate) struct AssetJob {
    pub node_id: NodeId,
    pub asset: AssetRef,
}

/// Resolve every job to an outcome, in job order.
///
/// Each unavailable asset yields exactly one warning. Cancellation aborts the
/// fetches still in flight.
#[instrument(skip_all, fields(jobs = jobs.len(), concurrency = policy.concurrency))]
pub(crate) async fn resolve_assets(
    jobs: &[AssetJob],
    fetcher: Arc<dyn AssetFetcher>,
    policy: &AssetPolicy,
    cancel: &CancellationToken,
) -> Result<(Vec<AssetOutcome>, Vec<Warning>), RenderError> {
    let mut outcomes: Vec<Option<AssetOutcome>> = vec![None; jobs.len()];
    let semaphore = Arc::new(Semaphore::new(policy.concurrency.max(1)));
    let mut set = JoinSet::new();

    for (index, job) in jobs.iter().enumerate() {
        let token = match plan(&job.asset, policy) {
            Plan::Done(outcome) => {
                outcomes[index] = Some(outcome);
                continue;
            }
            Plan::Fetch(token) => token,
        };

        let fetcher = Arc::clone(&fetcher);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let timeout = policy.timeout;
        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (index, Err(AssetError::Failed("fetch pool closed".into())));
            };
            if cancel.is_cancelled() {
                return (index, Err(AssetError::Failed("cancelled".into())));
            }
            debug!(%token, "fetching asset");
            let result = match tokio::time::timeout(timeout, fetcher.fetch(&token)).await {
                Ok(result) => result,
                Err(_) => Err(AssetError::TimedOut(timeout)),
            };
            (index, result)
        });
    }

    loop {
        let joined = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                set.abort_all();
                return Err(RenderError::Cancelled);
            }
            joined = set.join_next() => joined,
        };
        let Some(joined) = joined else { break };

        match joined {
            Ok((index, Ok(bytes))) => {
                outcomes[index] = Some(accept(bytes, &jobs[index].asset, policy));
            }
            Ok((index, Err(err))) => {
                outcomes[index] = Some(AssetOutcome::Unavailable(err.to_string()));
            }
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => return Err(RenderError::Cancelled),
        }
    }

    if cancel.is_cancelled() {
        return Err(RenderError::Cancelled);
    }

    let mut resolved = Vec::with_capacity(jobs.len());
    let mut warnings = Vec::new();
    for (job, outcome) in jobs.iter().zip(outcomes) {
        let outcome =
            outcome.unwrap_or_else(|| AssetOutcome::Unavailable("fetch did not complete".into()));
        if let AssetOutcome::Unavailable(reason) = &outcome {
            warn!(node = %job.node_id, asset = %job.asset.name, %reason, "asset unavailable");
            warnings.push(Warning::new(
                &job.node_id,
                WarningCategory::AssetUnavailable,
                format!("'{}': {reason}", job.asset.name),
            ));
        }
        resolved.push(outcome);
    }

    Ok((resolved, warnings))
}

enum Plan {
    Done(AssetOutcome),
    Fetch(String),
}

/// Decide whether an asset needs fetching at all.
fn plan(asset: &AssetRef, policy: &AssetPolicy) -> Plan {
    let link = || {
        asset
            .download_url
            .clone()
            .map_or(AssetOutcome::Listed, AssetOutcome::Linked)
    };

    match &asset.handle {
        AssetHandle::Unavailable { reason } => Plan::Done(AssetOutcome::Unavailable(reason.clone())),
        AssetHandle::Inline(bytes) => Plan::Done(accept(bytes.clone(), asset, policy)),
        AssetHandle::Token(_) if !policy.embed => Plan::Done(link()),
        AssetHandle::Token(_)
            if asset
                .size_bytes
                .is_some_and(|size| size > policy.max_embed_bytes) =>
        {
            Plan::Done(link())
        }
        AssetHandle::Token(token) => Plan::Fetch(token.clone()),
    }
}

/// Embed fetched bytes unless they turn out too large.
fn accept(bytes: Vec<u8>, asset: &AssetRef, policy: &AssetPolicy) -> AssetOutcome {
    if policy.embed && bytes.len() as u64 <= policy.max_embed_bytes {
        return AssetOutcome::Embedded(bytes);
    }
    asset
        .download_url
        .clone()
        .or_else(|| match &asset.handle {
            AssetHandle::Token(token) => Some(token.clone()),
            _ => None,
        })
        .map_or(AssetOutcome::Listed, AssetOutcome::Linked)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Serves fixed bytes per token; unknown tokens fail.
    struct MapFetcher {
        files: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
    }

    impl MapFetcher {
        fn new(files: &[(&str, &[u8])]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AssetFetcher for MapFetcher {
        async fn fetch(&self, token: &str) -> Result<Vec<u8>, AssetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(token)
                .cloned()
                .ok_or_else(|| AssetError::NotFound(token.to_string()))
        }
    }

    struct SlowFetcher;

    #[async_trait]
    impl AssetFetcher for SlowFetcher {
        async fn fetch(&self, _token: &str) -> Result<Vec<u8>, AssetError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    fn job(name: &str, handle: AssetHandle, size: Option<u64>) -> AssetJob {
        AssetJob {
            node_id: "F".into(),
            asset: AssetRef {
                name: name.into(),
                caption: name.into(),
                size_bytes: size,
                download_url: Some(format!("https://files.example/{name}")),
                content_type: None,
                handle,
            },
        }
    }

    fn policy() -> AssetPolicy {
        AssetPolicy {
            embed: true,
            max_embed_bytes: 1024,
            concurrency: 2,
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn fetched_and_failed_assets() {
        let fetcher = Arc::new(MapFetcher::new(&[("t-ok", b"data")]));
        let jobs = vec![
            job("ok.txt", AssetHandle::Token("t-ok".into()), Some(4)),
            job("gone.txt", AssetHandle::Token("t-missing".into()), Some(4)),
            job(
                "none.txt",
                AssetHandle::Unavailable {
                    reason: "no download link".into(),
                },
                None,
            ),
        ];
        let (outcomes, warnings) =
            resolve_assets(&jobs, fetcher.clone(), &policy(), &CancellationToken::new())
                .await
                .expect("resolve");

        assert_eq!(outcomes[0], AssetOutcome::Embedded(b"data".to_vec()));
        assert!(matches!(outcomes[1], AssetOutcome::Unavailable(_)));
        assert!(matches!(outcomes[2], AssetOutcome::Unavailable(_)));
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].message.starts_with("'gone.txt'"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn oversized_assets_are_linked_without_fetching() {
        let fetcher = Arc::new(MapFetcher::new(&[]));
        let jobs = vec![job("big.bin", AssetHandle::Token("t".into()), Some(10_000))];
        let (outcomes, warnings) =
            resolve_assets(&jobs, fetcher.clone(), &policy(), &CancellationToken::new())
                .await
                .expect("resolve");
        assert_eq!(
            outcomes[0],
            AssetOutcome::Linked("https://files.example/big.bin".into())
        );
        assert!(warnings.is_empty());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeouts_become_warnings() {
        let jobs = vec![job("slow.txt", AssetHandle::Token("t".into()), Some(1))];
        let (outcomes, warnings) = resolve_assets(
            &jobs,
            Arc::new(SlowFetcher),
            &policy(),
            &CancellationToken::new(),
        )
        .await
        .expect("resolve");
        assert!(matches!(&outcomes[0], AssetOutcome::Unavailable(r) if r.contains("timed out")));
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_fetches() {
        let cancel = CancellationToken::new();
        let jobs = vec![job("slow.txt", AssetHandle::Token("t".into()), Some(1))];
        let mut slow = policy();
        slow.timeout = Duration::from_secs(120);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = resolve_assets(&jobs, Arc::new(SlowFetcher), &slow, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, RenderError::Cancelled);
    }
}
