mod helloworld;

use std::{fs, path::PathBuf, rc::Rc};

use anyhow::{Context, Result};
use clap::Parser;
use controller::{load_settings, AppContext, Catalog, ControllerRegistry, MapContext};
use serde_json::Value;
use tracing::{info, warn};

/// Maps the sample controllers onto an in-memory page, replays clicks and
/// prints the resulting model.
#[derive(Parser, Debug)]
struct Cli {
    /// Site map file (JSON or TOML). The built-in sample map is used when
    /// omitted.
    #[arg(long)]
    sitemap: Option<PathBuf>,
    /// Location matched against location patterns. A `#fragment` becomes
    /// the initial history state.
    #[arg(long, default_value = "index.htm")]
    location: String,
    /// Selector of an element to click; repeat to click several in order.
    #[arg(long = "click")]
    clicks: Vec<String>,
    /// Log command failures instead of aborting.
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings();
    if cli.debug {
        settings.debug = true;
    }
    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();

    let doc = helloworld::build_page()?;
    let ctx = AppContext::new(settings, Rc::new(doc.clone()), Catalog::new());
    helloworld::register(&ctx, &doc)?;
    ctx.install_services(Rc::new(helloworld::services(&ctx)?));

    let registry = ControllerRegistry::new(&ctx)?;
    match &cli.sitemap {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read site map '{}'", path.display()))?;
            registry.load_site_map(&raw)?;
        }
        None => registry.load_site_map(helloworld::SITE_MAP)?,
    }

    let (location, fragment) = match cli.location.split_once('#') {
        Some((location, fragment)) => (location.to_string(), Some(fragment.to_string())),
        None => (cli.location.clone(), None),
    };
    registry.map_controllers(MapContext::Location(location))?;
    info!(controllers = registry.len(), "controllers mapped");

    match fragment {
        Some(fragment) => ctx.history().apply_hash(&fragment)?,
        None => ctx.history().check()?,
    }

    for selector in &cli.clicks {
        let Some(node) = doc.query_first(selector, None)? else {
            warn!(%selector, "nothing to click");
            continue;
        };
        doc.fire(node, "onclick", Value::Null)?;
    }

    for key in helloworld::MODEL_KEYS {
        println!("{key} = {}", ctx.model().get(key));
    }
    registry.teardown();
    Ok(())
}
