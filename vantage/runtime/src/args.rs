use crate::{
    core::SubjectKind,
    handle::Vantage,
    index::{metrics::IndexMetrics, AccessStore, AccessStoreMetrics, PolicyRuleIndex, RoleIndex},
    index_list::IndexList,
    k8s::{self, watcher},
    partition::{KubeStore, NamespacePartitioner, Store},
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{future::Future, sync::Arc};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "vantage", about = "An RBAC-aware partitioned resource store")]
pub struct Args {
    #[clap(long, default_value = "vantage=info,warn", env = "VANTAGE_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The number of partitions fetched concurrently by a single list.
    #[clap(long, default_value = "3")]
    list_concurrency: usize,

    /// The number of items returned by a list that does not name a limit.
    #[clap(long, default_value = "100000")]
    default_list_limit: usize,

    /// The number of computed access sets to cache. Zero disables caching.
    #[clap(long, default_value = "50")]
    access_cache_size: usize,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    /// Runs the controller until shutdown without serving any requests.
    pub async fn run(self) -> Result<()> {
        self.run_with(|_, shutdown| async move {
            info!("Indexes ready");
            let release = shutdown.signaled().await;
            info!("Shutting down");
            drop(release);
        })
        .await
    }

    /// Runs the controller, spawning `serve` with a handle to the store once the runtime is built.
    /// `serve` must complete once the shutdown watch is signaled.
    pub async fn run_with<F, S>(self, serve: F) -> Result<()>
    where
        F: FnOnce(Vantage, drain::Watch) -> S,
        S: Future<Output = ()> + Send + 'static,
    {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            list_concurrency,
            default_list_limit,
            access_cache_size,
        } = self;

        // Build the RBAC indexes that access sets are resolved from.
        let roles = RoleIndex::shared();
        let users = PolicyRuleIndex::shared(SubjectKind::User, roles.clone());
        let groups = PolicyRuleIndex::shared(SubjectKind::Group, roles.clone());

        let mut prom = <Registry>::default();
        let roles_metrics =
            IndexMetrics::register(roles, prom.sub_registry_with_prefix("role_index")).shared();
        let users_metrics = IndexMetrics::register(
            users.clone(),
            prom.sub_registry_with_prefix("user_binding_index"),
        )
        .shared();
        let groups_metrics = IndexMetrics::register(
            groups.clone(),
            prom.sub_registry_with_prefix("group_binding_index"),
        )
        .shared();
        let access_metrics = AccessStoreMetrics::register(prom.sub_registry_with_prefix("access"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        let rs = runtime.watch_all::<k8s::Role>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(roles_metrics.clone(), rs).instrument(info_span!("roles")),
        );

        let crs = runtime.watch_all::<k8s::ClusterRole>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(roles_metrics, crs).instrument(info_span!("clusterroles")),
        );

        let bindings = IndexList::new(users_metrics).push(groups_metrics).shared();

        let rbs = runtime.watch_all::<k8s::RoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(bindings.clone(), rbs)
                .instrument(info_span!("rolebindings")),
        );

        let crbs = runtime.watch_all::<k8s::ClusterRoleBinding>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(bindings, crbs).instrument(info_span!("clusterrolebindings")),
        );

        let access = AccessStore::new(users, groups)
            .with_cache(access_cache_size)
            .with_metrics(access_metrics);
        let backend = KubeStore::new(runtime.client());
        let store = Store::new(NamespacePartitioner::new(Arc::new(backend)))
            .with_concurrency(list_concurrency)
            .with_default_limit(default_list_limit);

        let vantage = Vantage::new(access, store);
        tokio::spawn(serve(vantage, runtime.shutdown_handle()).instrument(info_span!("serve")));

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["vantage"]).expect("defaults must parse");
        assert_eq!(args.list_concurrency, 3);
        assert_eq!(args.default_list_limit, 100_000);
        assert_eq!(args.access_cache_size, 50);
    }

    #[test]
    fn overrides() {
        let args = Args::try_parse_from([
            "vantage",
            "--list-concurrency=8",
            "--default-list-limit=500",
            "--access-cache-size=0",
            "--log-format=json",
        ])
        .expect("flags must parse");
        assert_eq!(args.list_concurrency, 8);
        assert_eq!(args.default_list_limit, 500);
        assert_eq!(args.access_cache_size, 0);
    }

    #[test]
    fn rejects_bad_limits() {
        assert!(Args::try_parse_from(["vantage", "--default-list-limit=-1"]).is_err());
    }
}
