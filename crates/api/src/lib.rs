//! kawait check pipeline (in-process).
//!
//! [`Checker`] owns the shared discovery catalog and resource store and runs
//! one target at a time through parse -> resolve -> lookup -> evaluate.
//! Failures are per target; nothing here aborts a batch.

#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kawait_core::{evaluate, CoreError, ReadinessVerdict, ResolvedType, Target, WatchedObject};
use kawait_kubehub::{resolve, DiscoveryCatalog, ResolveError};
use kawait_store::{Lister, ResourceStore};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of checking one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub target: Target,
    pub resolved: ResolvedType,
    pub verdict: ReadinessVerdict,
    pub resource_version: Option<String>,
}

impl Report {
    pub fn ready(&self) -> bool {
        self.verdict.is_ready()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, a {}", self.target.namespace, self.target.name, self.resolved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    NotFound,
    Store(String),
    TimedOut,
}

impl fmt::Display for LookupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupFailure::NotFound => f.write_str("object not found"),
            LookupFailure::Store(reason) => f.write_str(reason),
            LookupFailure::TimedOut => f.write_str("timed out waiting for the cache to sync"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Malformed(#[from] CoreError),
    #[error(transparent)]
    NoMatchingType(#[from] ResolveError),
    #[error("failed to fetch {}/{}, a {resolved}: {reason}", target.namespace, target.name)]
    LookupFailed { target: Target, resolved: ResolvedType, reason: LookupFailure },
}

impl CheckError {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckError::Malformed(_) => "MalformedIdentifier",
            CheckError::NoMatchingType(_) => "NoMatchingType",
            CheckError::LookupFailed { .. } => "LookupFailed",
        }
    }
}

pub type CheckResult<T> = Result<T, CheckError>;

fn lookup_failed(target: &Target, resolved: &ResolvedType, reason: LookupFailure) -> CheckError {
    CheckError::LookupFailed { target: target.clone(), resolved: resolved.clone(), reason }
}

/// `check_total` label for a finished check.
fn outcome(res: &CheckResult<Report>) -> &'static str {
    match res {
        Ok(r) => match r.verdict {
            ReadinessVerdict::Ready => "ready",
            ReadinessVerdict::Failed => "failed",
            ReadinessVerdict::Pending => "pending",
            ReadinessVerdict::Indeterminate => "indeterminate",
        },
        Err(CheckError::LookupFailed { .. }) => "lookup_failed",
        Err(CheckError::Malformed(_)) => "malformed",
        Err(CheckError::NoMatchingType(_)) => "no_matching_type",
    }
}

pub struct Checker {
    catalog: Arc<DiscoveryCatalog>,
    store: Arc<ResourceStore>,
}

impl Checker {
    pub fn new(catalog: Arc<DiscoveryCatalog>, store: Arc<ResourceStore>) -> Self {
        Self { catalog, store }
    }

    pub fn catalog(&self) -> &DiscoveryCatalog {
        &self.catalog
    }

    /// Parse and check a `<type>:[<namespace>/]<name>` identifier.
    pub async fn check_identifier(&self, identifier: &str) -> CheckResult<Report> {
        match kawait_core::parse(identifier) {
            Ok(target) => self.check(&target).await,
            Err(e) => {
                let res = Err(e.into());
                counter!("check_total", 1u64, "outcome" => outcome(&res));
                res
            }
        }
    }

    /// Single evaluation against the synced cache.
    pub async fn check(&self, target: &Target) -> CheckResult<Report> {
        let report = async {
            let resolved = self.resolve(target)?;
            let lister = self.lister(target, &resolved).await?;
            self.observe(&lister, target, &resolved)
        }
        .await;
        counter!("check_total", 1u64, "outcome" => outcome(&report));
        report
    }

    /// Re-evaluate on every cache change until the verdict is terminal or
    /// `timeout` elapses. A missing object is waited for as well; the last
    /// observation is returned at the deadline.
    pub async fn wait(&self, target: &Target, timeout: Duration) -> CheckResult<Report> {
        let deadline = Instant::now() + timeout;
        let report = match self.resolve(target) {
            Ok(resolved) => self.wait_until(target, &resolved, deadline).await,
            Err(e) => Err(e),
        };
        counter!("check_total", 1u64, "outcome" => outcome(&report));
        report
    }

    async fn wait_until(&self, target: &Target, resolved: &ResolvedType, deadline: Instant) -> CheckResult<Report> {
        let lister = match tokio::time::timeout_at(deadline, self.lister(target, resolved)).await {
            Ok(res) => res?,
            Err(_) => return Err(lookup_failed(target, resolved, LookupFailure::TimedOut)),
        };
        let mut epochs = lister.subscribe();
        loop {
            let last = self.observe(&lister, target, resolved);
            if matches!(&last, Ok(r) if r.verdict.is_terminal()) {
                return last;
            }
            match tokio::time::timeout_at(deadline, epochs.changed()).await {
                Ok(Ok(())) => debug!(object = %target, epoch = *epochs.borrow(), "cache changed; re-evaluating"),
                Ok(Err(_)) => {
                    warn!(object = %target, "sync task stopped while waiting");
                    return last;
                }
                Err(_) => {
                    info!(object = %target, "timed out waiting for a terminal condition");
                    return last;
                }
            }
        }
    }

    fn resolve(&self, target: &Target) -> CheckResult<ResolvedType> {
        let started = std::time::Instant::now();
        let resolved = resolve(&target.type_spec, &self.catalog);
        histogram!("resolve_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(resolved?)
    }

    async fn lister(&self, target: &Target, resolved: &ResolvedType) -> CheckResult<Lister> {
        self.store
            .get(resolved)
            .await
            .map_err(|e| lookup_failed(target, resolved, LookupFailure::Store(e.to_string())))
    }

    fn find(&self, lister: &Lister, target: &Target, resolved: &ResolvedType) -> Option<Arc<WatchedObject>> {
        if self.catalog.is_namespaced(resolved) {
            lister.by_namespace(&target.namespace).get(&target.name)
        } else {
            lister.cluster().get(&target.name)
        }
    }

    fn observe(&self, lister: &Lister, target: &Target, resolved: &ResolvedType) -> CheckResult<Report> {
        let Some(obj) = self.find(lister, target, resolved) else {
            return Err(lookup_failed(target, resolved, LookupFailure::NotFound));
        };
        let verdict = evaluate(obj.as_ref());
        let report = Report {
            target: target.clone(),
            resolved: resolved.clone(),
            verdict,
            resource_version: obj.resource_version.clone(),
        };
        match verdict {
            ReadinessVerdict::Pending => info!("{} has not finished yet", report),
            ReadinessVerdict::Indeterminate if !obj.has_conditions() => {
                warn!("could not find status.conditions for {}", report)
            }
            ReadinessVerdict::Indeterminate => info!("could not find a terminal condition on {}", report),
            ReadinessVerdict::Ready | ReadinessVerdict::Failed => info!("{} is {}", report, verdict),
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(reason: LookupFailure) -> CheckResult<Report> {
        Err(lookup_failed(
            &Target::new("deployments", "default", "web"),
            &ResolvedType::new("apps", "v1", "deployments"),
            reason,
        ))
    }

    #[test]
    fn missing_objects_count_as_lookup_failures() {
        assert_eq!(outcome(&failed(LookupFailure::NotFound)), "lookup_failed");
        assert_eq!(outcome(&failed(LookupFailure::Store("forbidden".into()))), "lookup_failed");
        assert_eq!(outcome(&failed(LookupFailure::TimedOut)), "lookup_failed");
    }

    #[test]
    fn reports_count_by_verdict() {
        let report = Report {
            target: Target::new("jobs.batch", "default", "migrate"),
            resolved: ResolvedType::new("batch", "v1", "jobs"),
            verdict: ReadinessVerdict::Failed,
            resource_version: None,
        };
        assert_eq!(outcome(&Ok(report)), "failed");
        let malformed = kawait_core::parse("no-separator").map(|_| ()).unwrap_err();
        assert_eq!(outcome(&Err(malformed.into())), "malformed");
    }
}
