//! lifecycle-operator library crate
//!
//! Drives Installation records through cluster version upgrades, add-on
//! convergence and airgap artifact distribution.

pub mod artifacts;
pub mod charts;
pub mod cli;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod registry;
pub mod release;
pub mod reporting;
pub mod store;
pub mod upgrade;

pub use health::HealthState;

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, PredicateConfig, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::coalesce::current_installation;
use controller::context::{Context, LifecycleEngine};
use controller::installation_reconciler::{error_policy, reconcile};
use crd::{Chart, Installation, Plan};

/// Create the default watcher configuration for all watches.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation, PredicateConfig::default());
    (reader, stream)
}

/// The record a change to a watched object should wake up.
///
/// Cycles always process every record, so one trigger per change is enough.
fn newest_installation(reader: &reflector::Store<Installation>) -> Option<ObjectRef<Installation>> {
    let records: Vec<Installation> = reader.state().iter().map(|i| (**i).clone()).collect();
    current_installation(&records).map(ObjectRef::from_obj)
}

/// Run the Installation controller (cluster-wide).
///
/// Besides Installation records, changes to nodes, upgrade plans, charts
/// and jobs trigger a cycle. Cycles never overlap. Requires leadership.
pub async fn run_controller(
    client: Client,
    engine: Arc<LifecycleEngine>,
    health_state: Option<Arc<HealthState>>,
    instance: Option<String>,
) {
    info!("Starting controller for Installation resources");

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), engine, health_state, instance));

    let installations: Api<Installation> = Api::all(client.clone());
    let nodes: Api<Node> = Api::all(client.clone());
    let plans: Api<Plan> = Api::all(client.clone());
    let charts: Api<Chart> = Api::all(client.clone());
    let jobs: Api<Job> = Api::all(client.clone());

    let watcher_config = default_watcher_config();
    let (reader, installation_stream) =
        create_filtered_stream(installations, watcher_config.clone());

    let on_node = {
        let reader = reader.clone();
        move |_: Node| newest_installation(&reader)
    };
    let on_plan = {
        let reader = reader.clone();
        move |_: Plan| newest_installation(&reader)
    };
    let on_chart = {
        let reader = reader.clone();
        move |_: Chart| newest_installation(&reader)
    };
    let on_job = {
        let reader = reader.clone();
        move |_: Job| newest_installation(&reader)
    };

    Controller::for_stream(installation_stream, reader)
        .with_config(
            ControllerConfig::default()
                .concurrency(1)
                .debounce(Duration::from_secs(1)),
        )
        .watches(nodes, watcher_config.clone(), on_node)
        .watches(plans, watcher_config.clone(), on_plan)
        .watches(charts, watcher_config.clone(), on_chart)
        .watches(jobs, watcher_config, on_job)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
