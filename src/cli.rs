use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "beluga",
    version,
    about = "A headless Kubernetes cluster monitor that polls metrics and issues."
)]
pub struct CliArgs {
    /// Use a specific kubeconfig context instead of the current one
    #[arg(long)]
    pub context: Option<String>,

    /// Scope namespaced listings to this namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Scope namespaced listings to all namespaces
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// List one or more resource kinds once (for example: pods, pods,deploy,svc or all) and exit
    #[arg(long, value_name = "KINDS")]
    pub list: Option<String>,

    /// Continuation token from a previous single-kind --list page
    #[arg(long, requires = "list")]
    pub page_token: Option<String>,

    /// Print the full YAML of each listed item instead of the column view
    #[arg(long, requires = "list")]
    pub yaml: bool,

    /// Print the kubeconfig context catalog and exit
    #[arg(long)]
    pub contexts: bool,

    /// Print per-node metrics for every node and exit
    #[arg(long)]
    pub nodes: bool,

    /// Print per-node metrics for a single node and exit
    #[arg(long, value_name = "NAME")]
    pub node: Option<String>,

    /// Print recent events for one resource (for example: Pod/web-0) and exit
    #[arg(long, value_name = "KIND/NAME")]
    pub events_for: Option<String>,

    /// Publish only critical issues on the issues stream
    #[arg(long)]
    pub critical: bool,

    /// Override the metrics polling interval in milliseconds
    #[arg(long)]
    pub metrics_ms: Option<u64>,

    /// Override the issues polling interval in milliseconds
    #[arg(long)]
    pub issues_ms: Option<u64>,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}
