use clap::{Parser, Subcommand};
use motion_mesh_server::api::routes::{run_server, AppState};
use motion_mesh_server::config::ServerConfig;
use motion_mesh_server::context::ModelContext;
use motion_mesh_server::orchestrator::Orchestrator;
use motion_mesh_server::scene::parse_glb;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "motion_mesh_server", version, about = "Serves text-to-motion generation as GLB mesh frames")]
struct Cli {
    /// JSON config file. Built-in defaults are used when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        /// 0 picks a free port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the pipeline once and write one .glb file per frame
    Render {
        #[arg(long)]
        text: String,
        #[arg(long)]
        lang_token: Option<String>,
        #[arg(long, default_value = "frames")]
        out_dir: PathBuf,
    },
    /// Print a summary of a .glb file
    Inspect { path: PathBuf },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Application error: {}", e);
        let mut current_err: Option<&(dyn std::error::Error + 'static)> = e.source();
        while let Some(source) = current_err {
            eprintln!("Caused by: {}", source);
            current_err = source.source();
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let orchestrator = build_orchestrator(&config)?;
            let state = AppState::new(orchestrator, Duration::from_secs(config.request_timeout_secs));
            actix_web::rt::System::new().block_on(run_server(&config, state))?;
        }
        Command::Render { text, lang_token, out_dir } => {
            let orchestrator = build_orchestrator(&config)?;
            let (text, lang_token) = orchestrator.prepare(&text, lang_token.as_deref())?;
            let features = orchestrator.generate_features(&text, &lang_token)?;
            let scenes = orchestrator.render_scenes(&features)?;

            fs::create_dir_all(&out_dir)?;
            for (index, glb) in scenes.iter().enumerate() {
                fs::write(out_dir.join(format!("frame_{:04}.glb", index)), glb)?;
            }
            println!("Wrote {} frames to {}", scenes.len(), out_dir.display());
        }
        Command::Inspect { path } => {
            let scene = parse_glb(&fs::read(&path)?)?;
            println!("{}", path.display());
            println!("  vertices: {}", scene.positions.nrows());
            println!("  faces:    {}", scene.faces.len());
            if let Some(color) = scene.colors.first() {
                println!("  color[0]: {:?}", color);
            }
        }
    }
    Ok(())
}

fn build_orchestrator(config: &ServerConfig) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let ctx = ModelContext::from_config(config)?;
    Ok(Orchestrator::new(Arc::new(ctx), &config.default_lang_token))
}
