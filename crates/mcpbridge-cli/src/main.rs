use clap::{Parser, Subcommand, ValueEnum};
use mcpbridge_core::{BridgeConfig, TransportConfig};
use mcpbridge_gateway::{
    McpHandler, McpProxy, OutboundConnection, ParamAliasTable, ToolChangeNotifier,
};
use mcpbridge_services::{
    MemoryRuntimeState, ModuleCatalog, ServiceInfo, ServiceRegistry, ServiceStatus,
    ToolAggregator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcpbridge", version, about = "MCP gateway: many tool servers, one endpoint")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "mcpbridge.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Start services, the outbound connection and the local proxy
    Serve {
        /// Host to bind the proxy to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port for the proxy (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List configured services
    Services {
        /// Start every enabled service and report its tools
        #[arg(long)]
        probe: bool,
    },
    /// Validate the config file and exit
    Check,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn parse_config(text: &str) -> anyhow::Result<BridgeConfig> {
    let config: BridgeConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

async fn load_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
    })?;
    parse_config(&text).map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path.display(), e))
}

/// In-process modules this binary provides. Programs embedding the gateway
/// as a library register their own.
fn module_catalog() -> ModuleCatalog {
    ModuleCatalog::new()
}

/// Embedded services naming a module the catalog does not provide, as
/// `(service id, module)` pairs.
fn missing_modules(config: &BridgeConfig, catalog: &ModuleCatalog) -> Vec<(String, String)> {
    config
        .services
        .iter()
        .filter_map(|service| match &service.transport {
            TransportConfig::Embedded(embedded) if !catalog.contains(&embedded.module) => {
                Some((service.id.clone(), embedded.module.clone()))
            }
            _ => None,
        })
        .collect()
}

fn check_modules(config: &BridgeConfig, catalog: &ModuleCatalog) -> anyhow::Result<()> {
    let missing = missing_modules(config, catalog);
    if missing.is_empty() {
        return Ok(());
    }
    let available = catalog.module_names();
    let available = if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    };
    let services: Vec<String> = missing
        .iter()
        .map(|(id, module)| format!("'{id}' (module '{module}')"))
        .collect();
    anyhow::bail!(
        "embedded services reference modules this binary does not provide: {}; available modules: {}",
        services.join(", "),
        available
    )
}

/// Register every configured service; enabled ones start as they register.
async fn build_registry(config: &BridgeConfig, catalog: ModuleCatalog) -> Arc<ServiceRegistry> {
    let registry = Arc::new(
        ServiceRegistry::new(catalog).with_runtime_state(Arc::new(MemoryRuntimeState::new())),
    );
    for service in &config.services {
        if let Err(e) = registry.register(service.clone()).await {
            warn!(service = %service.id, error = %e, "Service not registered");
        }
    }
    registry
}

async fn serve(config: BridgeConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let catalog = module_catalog();
    if let Err(e) = check_modules(&config, &catalog) {
        warn!(error = %e, "Some embedded services cannot start");
    }
    let registry = build_registry(&config, catalog).await;
    let stats = registry.stats().await;
    info!(
        total = stats.total,
        running = stats.running,
        error = stats.error,
        "Services registered"
    );

    let aggregator = Arc::new(ToolAggregator::from_config(
        registry.clone(),
        &config.aggregator,
    ));
    // Seed the fingerprint so the first real change is detected as one.
    aggregator.snapshot_and_check_changed().await;

    let handler = Arc::new(
        McpHandler::new(aggregator.clone())
            .with_aliases(ParamAliasTable::new(config.param_aliases.clone())),
    );

    let proxy = Arc::new(McpProxy::new(handler.clone(), &config.proxy));
    let addr = format!(
        "{}:{}",
        host.unwrap_or_else(|| config.proxy.host.clone()),
        port.unwrap_or(config.proxy.port)
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let (stop_proxy, proxy_stopped) = oneshot::channel::<()>();
    let proxy_task = {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = proxy_stopped.await;
            };
            proxy.serve(listener, shutdown).await
        })
    };

    let mut notifier = ToolChangeNotifier::new(aggregator).with_proxy(proxy);
    let outbound = match &config.outbound.url {
        Some(url) => {
            let conn = OutboundConnection::new(config.outbound.clone(), handler);
            if let Err(e) = conn.connect().await {
                warn!(url = %url, error = %e, "Outbound connection unavailable; retrying in background");
            }
            notifier =
                notifier.with_outbound(conn.clone(), config.outbound.reconnect_on_tools_changed);
            Some(conn)
        }
        None => {
            info!("No outbound url configured");
            None
        }
    };
    let notifier_task = notifier.spawn(registry.subscribe());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    notifier_task.abort();
    if let Some(conn) = &outbound {
        conn.disconnect().await;
    }
    for e in registry.stop_all().await {
        warn!(error = %e, "Service did not stop cleanly");
    }
    let _ = stop_proxy.send(());
    proxy_task.await??;
    info!("mcpbridge stopped");
    Ok(())
}

/// A started service and the names of the tools it reported.
struct ProbeReport {
    info: ServiceInfo,
    tools: Vec<String>,
}

/// Start every configured service, collect its status and tools, stop it again.
async fn probe_services(config: &BridgeConfig, catalog: ModuleCatalog) -> Vec<ProbeReport> {
    let registry = build_registry(config, catalog).await;
    let mut reports = Vec::new();
    for info in registry.list().await {
        let mut tools = Vec::new();
        if let Ok(adapter) = registry.get(&info.id).await {
            if let Ok(list) = adapter.list_tools().await {
                tools = list.into_iter().map(|tool| tool.name).collect();
            }
        }
        reports.push(ProbeReport { info, tools });
    }
    for e in registry.stop_all().await {
        warn!(error = %e, "Service did not stop cleanly");
    }
    reports
}

async fn list_services(config: &BridgeConfig, probe: bool) {
    if config.services.is_empty() {
        println!("No services configured.");
        println!("Add [[services]] tables to the config file.");
        return;
    }

    if !probe {
        println!("Configured services:");
        for service in &config.services {
            let state = if service.enabled { "enabled" } else { "disabled" };
            println!("  {} ({}) [{}] {}", service.id, service.name, service.kind(), state);
        }
        println!("\nTotal: {} service(s)", config.services.len());
        return;
    }

    let reports = probe_services(config, module_catalog()).await;
    let count = |status: ServiceStatus| reports.iter().filter(|r| r.info.status == status).count();
    for report in &reports {
        let info = &report.info;
        println!(
            "  {} ({}) [{}] {} tools={}",
            info.id, info.name, info.kind, info.status, info.tool_count
        );
        if let Some(err) = &info.last_error {
            println!("    error: {err}");
        }
        for tool in &report.tools {
            println!("    - {tool}");
        }
    }
    println!(
        "\nTotal: {} service(s), {} running, {} failed",
        reports.len(),
        count(ServiceStatus::Running),
        count(ServiceStatus::Error)
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(&cli.config).await?;

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await?,
        Commands::Services { probe } => list_services(&config, probe).await,
        Commands::Check => {
            check_modules(&config, &module_catalog())?;
            println!(
                "{}: ok ({} service(s), outbound {}, proxy on {}:{}{})",
                cli.config.display(),
                config.services.len(),
                config.outbound.url.as_deref().unwrap_or("disabled"),
                config.proxy.host,
                config.proxy.port,
                config.proxy.path
            );
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcpbridge_core::{
        BridgeResult, CallToolRequest, CallToolResult, InitializeResult, ListToolsResult, Tool,
        TransportKind,
    };
    use mcpbridge_services::EmbeddedModule;

    #[test]
    fn test_minimal_config_is_valid() {
        let config = parse_config("").unwrap();
        assert!(config.services.is_empty());
        assert!(config.outbound.url.is_none());
        assert_eq!(config.proxy.path, "/mcp");
    }

    #[test]
    fn test_full_config() {
        let config = parse_config(
            r#"
            [outbound]
            url = "wss://orchestrator.example/ws"
            reconnect_on_tools_changed = true

            [proxy]
            port = 4000
            bearer_token = "abc"

            [aggregator]
            services = ["fs"]

            [param_aliases.read_file]
            file = "path"

            [[services]]
            id = "fs"
            name = "Filesystem"
            type = "stdio"
            command = "mcp-fs"
            args = ["--root", "/tmp"]

            [[services]]
            id = "search"
            name = "Search"
            type = "http"
            url = "https://search.example/mcp"
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].kind(), TransportKind::Stdio);
        let TransportConfig::Http(http) = &config.services[1].transport else {
            panic!("expected http transport");
        };
        assert_eq!(http.url, "https://search.example/mcp");
        assert!(!config.services[1].enabled);
        assert!(config.outbound.reconnect_on_tools_changed);
        assert_eq!(config.proxy.port, 4000);
        assert_eq!(config.param_aliases["read_file"]["file"], "path");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = parse_config(
            r#"
            [[services]]
            id = "a"
            name = "A"
            type = "sse"
            url = "http://localhost:1/sse"

            [[services]]
            id = "a"
            name = "A again"
            type = "sse"
            url = "http://localhost:2/sse"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate service id"));
    }

    #[test]
    fn test_bad_outbound_scheme_rejected() {
        let err = parse_config("[outbound]\nurl = \"http://nope\"\n").unwrap_err();
        assert!(err.to_string().contains("ws://"));
    }

    #[tokio::test]
    async fn test_build_registry_isolates_failures() {
        let config = parse_config(
            r#"
            [[services]]
            id = "ghost"
            name = "Ghost"
            type = "embedded"
            module = "not-registered"
            "#,
        )
        .unwrap();
        let registry = build_registry(&config, module_catalog()).await;
        let stats = registry.stats().await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.error, 1);
    }

    struct Greeter;

    #[async_trait]
    impl EmbeddedModule for Greeter {
        async fn initialize(&self) -> BridgeResult<InitializeResult> {
            Ok(InitializeResult::for_gateway("0.0.1"))
        }

        async fn list_tools(&self) -> BridgeResult<ListToolsResult> {
            Ok(ListToolsResult::new(vec![
                Tool::new("greet", "Say hello"),
                Tool::new("wave", "Wave"),
            ]))
        }

        async fn call_tool(&self, _request: CallToolRequest) -> BridgeResult<CallToolResult> {
            Ok(CallToolResult::text("hello"))
        }

        async fn close(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    const PROBE_CONFIG: &str = r#"
        [[services]]
        id = "greeter"
        name = "Greeter"
        type = "embedded"
        module = "greeter"

        [[services]]
        id = "ghost"
        name = "Ghost"
        type = "embedded"
        module = "not-registered"
    "#;

    #[tokio::test]
    async fn test_probe_reports_tools_and_failures() {
        let config = parse_config(PROBE_CONFIG).unwrap();
        let catalog = ModuleCatalog::new();
        catalog.register("greeter", |_| Ok(Arc::new(Greeter) as Arc<dyn EmbeddedModule>));

        let reports = probe_services(&config, catalog).await;
        assert_eq!(reports.len(), 2);

        let ghost = reports.iter().find(|r| r.info.id == "ghost").unwrap();
        assert_eq!(ghost.info.status, ServiceStatus::Error);
        assert!(ghost.tools.is_empty());

        let greeter = reports.iter().find(|r| r.info.id == "greeter").unwrap();
        assert_eq!(greeter.info.status, ServiceStatus::Running);
        assert_eq!(greeter.info.tool_count, 2);
        assert_eq!(greeter.tools, vec!["greet".to_string(), "wave".to_string()]);
    }

    #[tokio::test]
    async fn test_list_services_probe_runs() {
        let config = parse_config(PROBE_CONFIG).unwrap();
        list_services(&config, true).await;
        list_services(&config, false).await;
    }

    #[test]
    fn test_check_rejects_unknown_embedded_modules() {
        let config = parse_config(PROBE_CONFIG).unwrap();
        let err = check_modules(&config, &module_catalog()).unwrap_err().to_string();
        assert!(err.contains("'ghost' (module 'not-registered')"), "{err}");
        assert!(err.contains("'greeter' (module 'greeter')"), "{err}");
        assert!(err.contains("available modules: none"), "{err}");

        let catalog = ModuleCatalog::new();
        catalog.register("greeter", |_| Ok(Arc::new(Greeter) as Arc<dyn EmbeddedModule>));
        catalog.register("not-registered", |_| {
            Ok(Arc::new(Greeter) as Arc<dyn EmbeddedModule>)
        });
        assert!(check_modules(&config, &catalog).is_ok());
        assert!(missing_modules(&parse_config("").unwrap(), &catalog).is_empty());
    }
}
