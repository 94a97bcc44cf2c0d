use evalstack::{StackComposer, rehydrate};
use evalstack_types::{CallSite, EvaluationUrl, RemoteException};
use facet::Facet;
use figue as args;
use std::path::Path;
use tracing::debug;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    #[facet(args::subcommand)]
    command: Command,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum Command {
    /// Compose a captured remote exception with host call sites.
    Compose {
        /// JSON-encoded `RemoteException`.
        #[facet(args::named)]
        exception: String,
        /// JSON array of call sites, innermost first.
        #[facet(args::named, default)]
        call_sites: Option<String>,
        #[facet(args::named, default)]
        limit: Option<usize>,
        /// Print a JSON object instead of the stack text.
        #[facet(args::named, default)]
        json: bool,
    },
    /// Decode an evaluation source URL.
    Url {
        #[facet(args::named)]
        url: String,
    },
}

#[derive(Facet)]
struct ComposedOutput {
    name: String,
    message: String,
    stack: String,
    frames: Vec<String>,
}

#[derive(Facet)]
struct UrlOutput {
    boundary: String,
    call_site: Option<CallSite>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("evalstack")
                .description("Compose and inspect remote evaluation stack traces")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;

    match cli.value.command {
        Command::Compose {
            exception,
            call_sites,
            limit,
            json,
        } => run_compose(&exception, call_sites.as_deref(), limit, json),
        Command::Url { url } => run_url(&url),
    }
}

fn run_compose(
    exception_path: &str,
    call_sites_path: Option<&str>,
    limit: Option<usize>,
    json: bool,
) -> Result<(), String> {
    let exception: RemoteException = read_json(Path::new(exception_path))?;
    let call_sites: Vec<CallSite> = match call_sites_path {
        Some(path) => read_json(Path::new(path))?,
        None => Vec::new(),
    };
    debug!(
        frames = exception.raw_stack.len(),
        call_sites = call_sites.len(),
        "composing"
    );

    let composer = limit.map(StackComposer::new).unwrap_or_default();
    let composed = composer.compose(&exception, &call_sites);
    let error = rehydrate(&exception, &composed);

    if json {
        let output = ComposedOutput {
            name: error.name().to_string(),
            message: error.message().to_string(),
            stack: error.stack().to_string(),
            frames: error.frames().map(str::to_string).collect(),
        };
        println!(
            "{}",
            facet_json::to_string_pretty(&output).map_err(|e| format!("encode output: {e}"))?
        );
    } else {
        println!("{}", error.stack());
    }
    Ok(())
}

fn run_url(url: &str) -> Result<(), String> {
    let parsed = EvaluationUrl::parse(url).ok_or_else(|| format!("not an evaluation URL: {url}"))?;
    let output = UrlOutput {
        boundary: parsed.boundary.to_string(),
        call_site: parsed.site,
    };
    println!(
        "{}",
        facet_json::to_string_pretty(&output).map_err(|e| format!("encode output: {e}"))?
    );
    Ok(())
}

fn read_json<T>(path: &Path) -> Result<T, String>
where
    T: for<'facet> Facet<'facet>,
{
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("read {}: {e}", path.display()))?;
    facet_json::from_str(&text).map_err(|e| format!("decode {}: {e}", path.display()))
}
