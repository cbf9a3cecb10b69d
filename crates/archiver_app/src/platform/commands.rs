//! The subcommands of the `archiver` binary.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use anyhow::{bail, Context as _};
use archiver_core::{content_address, ResourceState};
use archiver_engine::{
    load_rules_dir, Accept, Archiver, Container, ContainerReader, ExtractFailure, ExtractOptions,
    Fetcher, ReqwestFetcher, ScriptCache, SourceDocument, LOG_FILE, PROPS_FILE,
};
use chrono::{DateTime, Local};
use engine_logging::{engine_info, engine_warn, parse_log, LogLevel};
use tokio_util::sync::CancellationToken;

use super::settings::AppSettings;

/// Length of identifiers derived from a URL.
const DERIVED_ID_LEN: usize = 16;

/// Bookmark identifier used when none is given on the command line.
pub fn derived_id(url: &str) -> String {
    content_address(url)[..DERIVED_ID_LEN].to_string()
}

fn options(
    settings: &AppSettings,
    no_readability: bool,
    cancel: CancellationToken,
) -> ExtractOptions {
    ExtractOptions {
        readability: settings.readability && !no_readability,
        enrich_links: settings.enrich_links,
        cancel,
    }
}

/// Cancels `token` on Ctrl-C.
pub fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            engine_warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}

pub async fn archive(
    settings: &AppSettings,
    url: &str,
    id: Option<String>,
    no_readability: bool,
) -> anyhow::Result<()> {
    let config = settings.engine_config();
    let fetch_settings = config.fetch.clone();
    let archiver = Archiver::new(config);

    let headers = url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let host = parsed.host_str()?.to_string();
            let index = archiver.rules().current();
            let headers = index.resolve(&host).map(|(_, rule)| rule.http_headers.clone());
            headers
        })
        .unwrap_or_default();
    let fetcher = ReqwestFetcher::new(fetch_settings).with_headers(&headers);
    let output = fetcher
        .fetch(url, Accept::Document)
        .await
        .with_context(|| format!("cannot fetch {url}"))?;
    engine_info!(
        "Fetched {} bytes from {} after {} redirects",
        output.metadata.byte_len,
        output.metadata.final_url,
        output.metadata.redirect_count
    );

    let id = id.unwrap_or_else(|| derived_id(url));
    let source = SourceDocument {
        bytes: output.bytes,
        content_type: output.metadata.content_type,
    };
    let options = options(settings, no_readability, cancel_on_interrupt());
    let outcome = archiver
        .extract(&id, source, &output.metadata.final_url, options)
        .await
        .map_err(report_failure)?;

    let mut out = std::io::stdout().lock();
    writeln!(out, "{id}: {}", outcome.container.display())?;
    writeln!(out, "title: {}", outcome.meta.title)?;
    let kept = outcome
        .resources
        .iter()
        .filter(|r| !matches!(r.state, ResourceState::Dropped(_)))
        .count();
    writeln!(
        out,
        "resources: {kept} kept, {} dropped",
        outcome.resources.len() - kept
    )?;
    for link in &outcome.enriched {
        match (&link.title, &link.error) {
            (_, Some(error)) => writeln!(out, "link {}: {error}", link.url)?,
            (Some(title), None) => writeln!(out, "link {}: {title}", link.url)?,
            (None, None) => writeln!(
                out,
                "link {}: {}",
                link.url,
                link.content_type.as_deref().unwrap_or("unknown type")
            )?,
        }
    }
    Ok(())
}

/// Runs the pipeline over a local file and prints the article on stdout.
pub async fn preview(
    settings: &AppSettings,
    file: &Path,
    url: &str,
    no_readability: bool,
) -> anyhow::Result<()> {
    let bytes = fs::read(file).with_context(|| format!("cannot read {}", file.display()))?;
    let archiver = Archiver::new(settings.engine_config());
    let mut options = options(settings, no_readability, cancel_on_interrupt());
    options.enrich_links = false;

    let bundle = archiver
        .preview(
            SourceDocument {
                bytes,
                content_type: None,
            },
            url,
            options,
        )
        .await
        .map_err(report_failure)?;

    eprint!("{}", bundle.log.render());
    for (name, bytes) in &bundle.files {
        eprintln!("{name} ({} bytes)", bytes.len());
    }
    let mut out = std::io::stdout().lock();
    writeln!(out, "{}", bundle.index_html)?;
    Ok(())
}

/// Prints the props, resources and debug log of a stored container.
pub fn show(settings: &AppSettings, target: &str) -> anyhow::Result<()> {
    let path = if Path::new(target).is_file() {
        target.into()
    } else {
        archiver_engine::StoragePaths::new(settings.data_dir.clone())
            .container_path(target)
            .with_context(|| format!("{target} is neither a container nor a bookmark id"))?
    };
    let mut reader = Container::open(&path)
        .with_context(|| format!("cannot open container {}", path.display()))?;
    let mut out = std::io::stdout().lock();

    let props = reader.get_text(PROPS_FILE)?;
    if let Some(archived) = archived_at(&props) {
        writeln!(out, "archived {}", archived.format("%Y-%m-%d %H:%M:%S"))?;
    }
    writeln!(out, "{}", props.trim_end())?;
    write_resources(&mut out, &mut reader)?;

    if reader.contains(LOG_FILE) {
        writeln!(out, "--- log")?;
        for line in parse_log(&reader.get_text(LOG_FILE)?) {
            writeln!(out, "{} {}", line.level.token(), line.line)?;
        }
    }
    Ok(())
}

fn write_resources(
    out: &mut impl std::io::Write,
    reader: &mut ContainerReader<fs::File>,
) -> anyhow::Result<()> {
    let names = reader.list_resources();
    writeln!(out, "--- {} resources", names.len())?;
    for name in names {
        let size = reader.get_file(&name)?.len();
        writeln!(out, "{name} {size}")?;
    }
    Ok(())
}

fn archived_at(props: &str) -> Option<DateTime<Local>> {
    let value: serde_json::Value = serde_json::from_str(props).ok()?;
    let archived = value.get("archived")?.as_str()?;
    DateTime::parse_from_rfc3339(archived)
        .ok()
        .map(|at| at.with_timezone(&Local))
}

/// Loads site rules and content scripts and reports every load error.
pub fn check(settings: &AppSettings) -> anyhow::Result<()> {
    let config = settings.engine_config();
    let mut failures = 0;

    if let Some(dir) = &config.rules_dir {
        let (index, errors) = load_rules_dir(dir);
        println!("{} site rules in {}", index.len(), dir.display());
        for err in &errors {
            println!("  {err}");
        }
        failures += errors.len();
    }

    let registry = ScriptCache::new(config.scripts.clone()).load_all();
    println!("{} content scripts", registry.len());
    for program in registry.programs() {
        println!("  {} for {}", program.name, program.domains.join(", "));
    }
    for err in registry.errors() {
        println!("  {err}");
    }
    failures += registry.errors().len();

    if failures > 0 {
        bail!("{failures} rules or scripts failed to load");
    }
    Ok(())
}

fn report_failure(failure: ExtractFailure) -> anyhow::Error {
    for line in parse_log(&failure.log.render()) {
        if line.level >= LogLevel::Warn {
            eprintln!("{} {}", line.level.token(), line.line);
        }
    }
    anyhow::Error::new(failure.error)
}
