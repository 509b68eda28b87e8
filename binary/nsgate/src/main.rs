use clap::Parser;
use nsgate_shell::{
    config_service::service::{memory::Memory, ResourceStore},
    kernel::dataplane::RecordingEngine,
    model::ResourceList,
    BoxError, ControllerConfig,
};
use tracing::info;
mod args;

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = args::Args::parse();
    let config = args.controller_config()?;
    // refuse to start on a bad scope before anything is spawned
    config.validate()?;
    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().thread_name(env!("CARGO_PKG_NAME")).build()?;
    rt.block_on(async move {
        info!("store: {}, dry run: {}", args.store, args.dry_run);
        match args.store {
            #[cfg(feature = "fs")]
            args::Store::File(dir) if args.dry_run => {
                use nsgate_shell::config_service::service::{config_format::Json, fs::Fs};
                dry_run(Fs::new(dir, Json::default()), config).await
            }
            #[cfg(feature = "fs")]
            args::Store::File(dir) => nsgate_shell::startup_file(dir, config).await,
            #[cfg(feature = "k8s")]
            args::Store::K8s if args.dry_run => dry_run(nsgate_shell::config_service::service::k8s::K8s::with_default_client().await?, config).await,
            #[cfg(feature = "k8s")]
            args::Store::K8s => nsgate_shell::startup_k8s(config).await,
            args::Store::Memory(path) => {
                let resources = match path {
                    Some(path) => serde_json::from_slice::<ResourceList>(&std::fs::read(path)?)?,
                    None => ResourceList::default(),
                };
                if args.dry_run {
                    dry_run(Memory::new(resources), config).await
                } else {
                    nsgate_shell::startup_static(resources, config).await
                }
            }
        }
    })
}

async fn dry_run<S: ResourceStore>(store: S, config: ControllerConfig) -> Result<(), BoxError> {
    nsgate_shell::startup(store, RecordingEngine::new(), config).await
}
