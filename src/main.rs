mod cli;
mod clients;
mod config;
mod context;
mod events;
mod metrics;
mod model;
mod poller;
mod quantity;
mod resources;

use anyhow::{Context as _, Result};
use clap::Parser;
use cli::CliArgs;
use clients::ClientPool;
use config::Settings;
use context::ClusterContext;
use events::IssueAggregator;
use metrics::MetricsAggregator;
use model::{
    ClusterIssue, ClusterMetrics, MetricsHistory, NamespaceScope, NodeMetrics, ResourceKind,
    ResourcePage,
};
use poller::{ClusterSource, PollCoordinator, PollEvent};
use quantity::{format_bytes, format_cores};
use resources::ResourceLoader;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct LiveSource {
    metrics: MetricsAggregator,
    issues: IssueAggregator,
    critical_only: bool,
}

impl ClusterSource for LiveSource {
    async fn metrics(&self) -> Result<ClusterMetrics> {
        Ok(self.metrics.cluster_metrics().await)
    }

    async fn issues(&self) -> Result<Vec<ClusterIssue>> {
        if self.critical_only {
            Ok(self.issues.critical_issues().await)
        } else {
            Ok(self.issues.cluster_issues().await)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter)?;

    let (settings, config_source) = Settings::load()?;
    if let Some(source) = &config_source {
        info!(source, "loaded configuration file");
    }

    let cluster = ClusterContext::resolve(args.context.clone()).await?;

    if args.contexts {
        print_context_catalog(&cluster);
        return Ok(());
    }

    let pool = Arc::new(ClientPool::new(
        cluster.config().clone(),
        settings.client_max_attempts,
    ));
    if !pool.is_connected().await {
        anyhow::bail!(
            "cluster '{}' at {} is unreachable",
            cluster.context(),
            cluster.cluster_url()
        );
    }
    match pool.cluster_version().await {
        Ok(version) => info!(
            context = cluster.context(),
            user = cluster.user(),
            version,
            "connected"
        ),
        Err(error) => warn!(error = %error, "connected, but version query failed"),
    }

    let scope = resolve_namespace_scope(&args, &cluster);
    let metrics = MetricsAggregator::new(Arc::clone(&pool), settings.node_batching());
    let issues = IssueAggregator::new(Arc::clone(&pool), settings.issue_limits());

    if let Some(tokens) = &args.list {
        let mut kinds = Vec::new();
        for token in tokens.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token.eq_ignore_ascii_case("all") {
                kinds.extend(ResourceKind::ALL);
                continue;
            }
            let Some(kind) = ResourceKind::from_token(token) else {
                anyhow::bail!("unsupported resource kind '{token}'");
            };
            kinds.push(kind);
        }
        if kinds.is_empty() {
            anyhow::bail!("no resource kinds given");
        }

        let loader = ResourceLoader::new(Arc::clone(&pool), settings.page_limit);
        if let [kind] = kinds[..] {
            let page = loader
                .load(kind, &scope, args.page_token.as_deref())
                .await
                .with_context(|| format!("failed to list {}", kind.title()))?;
            print_page(kind, &scope, &page, args.yaml);
        } else {
            if args.page_token.is_some() {
                anyhow::bail!("--page-token only applies to a single-kind --list");
            }
            for (kind, page) in loader.load_many(&kinds, &scope).await {
                print_page(kind, &scope, &page, args.yaml);
            }
        }
        return Ok(());
    }

    if let Some(name) = &args.node {
        match metrics.node_metrics(name).await {
            Some(node) => print_node_metrics(&[node]),
            None => anyhow::bail!("no metrics available for node '{name}'"),
        }
        return Ok(());
    }

    if args.nodes {
        let nodes = metrics.all_node_metrics(None).await;
        print_node_metrics(&nodes);
        return Ok(());
    }

    if let Some(target) = &args.events_for {
        let (kind, name) = target
            .split_once('/')
            .context("expected KIND/NAME, for example Pod/web-0")?;
        let namespace = match &scope {
            NamespaceScope::All => None,
            NamespaceScope::Named(namespace) => Some(namespace.as_str()),
        };
        for event in issues.resource_events(kind, name, namespace).await {
            println!(
                "{:<16} {:<8} {:<20} x{:<4} {:<6} {}",
                event.namespace, event.event_type, event.reason, event.count, event.age,
                event.message
            );
        }
        return Ok(());
    }

    let metrics_interval = args
        .metrics_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| settings.metrics_interval());
    let issues_interval = args
        .issues_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| settings.issues_interval());

    let source = LiveSource {
        metrics,
        issues,
        critical_only: args.critical,
    };
    let (coordinator, mut receiver) = PollCoordinator::new(source);
    coordinator.start_polling(metrics_interval, issues_interval);

    let mut history = MetricsHistory::new(settings.history_depth);
    loop {
        tokio::select! {
            maybe_event = receiver.recv() => {
                match maybe_event {
                    Some(PollEvent::Metrics(metrics)) => {
                        history.push(metrics);
                        if let Some(latest) = history.latest() {
                            print_metrics_line(latest, &history);
                        }
                    }
                    Some(PollEvent::Issues(issues)) => print_issues(&issues),
                    Some(PollEvent::Error { stream, message }) => {
                        warn!(stream = stream.label(), message, "poll stream error");
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                coordinator.shutdown();
                break;
            }
        }
    }

    Ok(())
}

fn init_tracing(level_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .try_init();

    Ok(())
}

fn resolve_namespace_scope(args: &CliArgs, cluster: &ClusterContext) -> NamespaceScope {
    if args.all_namespaces && args.namespace.is_some() {
        warn!("both --all-namespaces and --namespace were provided, using all namespaces");
    }

    if args.all_namespaces {
        NamespaceScope::All
    } else if let Some(namespace) = &args.namespace {
        NamespaceScope::Named(namespace.clone())
    } else {
        NamespaceScope::Named(cluster.default_namespace().to_string())
    }
}

fn print_context_catalog(cluster: &ClusterContext) {
    println!(
        "{:<24} {:<24} {:<20} {:<16} {}",
        "CONTEXT", "CLUSTER", "USER", "NAMESPACE", "SERVER"
    );
    for target in cluster.targets() {
        let marker = if target.context == cluster.context() {
            "*"
        } else {
            " "
        };
        println!(
            "{marker}{:<23} {:<24} {:<20} {:<16} {}",
            target.context,
            target.cluster_name,
            target.user_name.as_deref().unwrap_or("-"),
            target.namespace.as_deref().unwrap_or("-"),
            target.cluster_server.as_deref().unwrap_or("-"),
        );
    }
}

fn print_page(kind: ResourceKind, scope: &NamespaceScope, page: &ResourcePage, yaml: bool) {
    if kind.namespaced() {
        println!("{} (namespace: {scope})", kind.title());
    } else {
        println!("{}", kind.title());
    }

    if yaml {
        for item in &page.items {
            match &item.namespace {
                Some(namespace) => println!("--- # {namespace}/{} age={}", item.name, item.age),
                None => println!("--- # {} age={}", item.name, item.age),
            }
            print!("{}", item.detail);
        }
    } else {
        println!("{}", page.headers.join("\t"));
        for item in &page.items {
            println!("{}", item.columns.join("\t"));
        }
    }

    match &page.next_token {
        Some(token) => println!("# next page: --page-token {token}"),
        None => println!("# {} items, no further pages", page.items.len()),
    }
}

fn print_node_metrics(nodes: &[NodeMetrics]) {
    println!(
        "{:<32} {:<18} {:<20} {:<10} {:<8} {}",
        "NODE", "CPU", "MEMORY", "PODS", "DISK", "SOURCE"
    );
    for node in nodes {
        let disk = node
            .disk_estimate_percent
            .map(|percent| format!("~{percent:.0}%"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<32} {:<18} {:<20} {:<10} {:<8} {}",
            node.node,
            format!(
                "{:.1}% of {}",
                node.cpu.usage_percent,
                format_cores(node.cpu.capacity)
            ),
            format!(
                "{:.1}% of {}",
                node.memory.usage_percent,
                format_bytes(node.memory.capacity * 1_048_576.0)
            ),
            format!("{}/{}", node.pods.count, node.pods.capacity),
            disk,
            node.source.label(),
        );
    }
}

fn print_metrics_line(metrics: &ClusterMetrics, history: &MetricsHistory) {
    let trend = if history.len() < 2 {
        "n/a".to_string()
    } else {
        history
            .cpu_trend()
            .iter()
            .map(|value| format!("{value:.0}"))
            .collect::<Vec<_>>()
            .join(",")
    };
    println!(
        "[{}] cpu {:.2}% (req {} / lim {} of {}, alloc {}) | mem {:.2}% (req {} / lim {} of {}, alloc {}) | pods {}/{} ({:.1}%) | source={} | trend={}",
        metrics.sampled_at.format("%H:%M:%S"),
        metrics.cpu.usage_percent,
        format_cores(metrics.cpu.requests),
        format_cores(metrics.cpu.limits),
        format_cores(metrics.cpu.capacity),
        format_cores(metrics.cpu.allocatable),
        metrics.memory.usage_percent,
        format_bytes(metrics.memory.requests * 1_048_576.0),
        format_bytes(metrics.memory.limits * 1_048_576.0),
        format_bytes(metrics.memory.capacity * 1_048_576.0),
        format_bytes(metrics.memory.allocatable * 1_048_576.0),
        metrics.pods.count,
        metrics.pods.capacity,
        metrics.pods.usage_percent(),
        metrics.source.label(),
        trend,
    );
}

fn print_issues(issues: &[ClusterIssue]) {
    if issues.is_empty() {
        println!("no issues in the current window");
        return;
    }
    println!("{} issue(s):", issues.len());
    for issue in issues {
        let marker = if issue.critical { "!" } else { " " };
        println!(
            " {marker}{:<8} {:<20} {:<32} {:<6} {}",
            issue.severity,
            issue.reason,
            format!("{}/{}", issue.namespace, issue.object),
            issue.age,
            issue.message
        );
    }
}
