use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use searchstate_core::{FilterKind, GroupType};
use searchstate_store::{SearchConfig, SearchStore};

#[derive(Parser)]
#[command(name = "searchstate")]
#[command(about="SearchState debug CLI", long_about=None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Build a store from a setup file, apply toggles, print the composed
    /// query as JSON.
    Compose {
        /// Path to a JSON search-view setup (action domain/context, arch,
        /// fields, favorites, dynamic filters).
        setup: String,
        /// Descriptions of filters to toggle, in order.
        #[arg(long)]
        toggle: Vec<String>,
        /// Field names to create group-bys on.
        #[arg(long)]
        group_by: Vec<String>,
        /// Write the composed query here instead of stdout.
        #[arg(long)]
        out: Option<String>,
    },
    /// List the filters of one type known to the store.
    Filters {
        setup: String,
        #[arg(long, default_value = "filter")]
        kind: String,
    },
    /// Print the exported `{filters, groups, query}` state.
    Export {
        setup: String,
        #[arg(long)]
        toggle: Vec<String>,
    },
}

fn read_config(path: &str) -> Result<SearchConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let config = serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;
    Ok(config)
}

fn toggle_by_description(store: &mut SearchStore, description: &str) -> Result<()> {
    let found = store
        .filters()
        .find(|f| f.description == description)
        .map(|f| (f.id, has_options(&f.kind)));
    let Some((filter_id, with_options)) = found else {
        bail!("no filter named {description:?}");
    };
    if with_options {
        store.toggle_filter_with_options(filter_id, None)?;
    } else {
        store.toggle_filter(filter_id)?;
    }
    Ok(())
}

fn has_options(kind: &FilterKind) -> bool {
    matches!(
        kind,
        FilterKind::Predicate { date: Some(_), .. }
            | FilterKind::GroupBy {
                intervals: Some(_),
                ..
            }
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Compose {
            setup,
            toggle,
            group_by,
            out,
        } => {
            let mut store = SearchStore::new(read_config(&setup)?)?;
            for description in &toggle {
                toggle_by_description(&mut store, description)?;
            }
            for field in &group_by {
                store.create_new_group_by(field)?;
            }
            let query = store.get_query()?;
            let rendered = serde_json::to_string_pretty(&query)?;
            match out {
                Some(path) => std::fs::write(path, rendered)?,
                None => println!("{rendered}"),
            }
        }
        Cmd::Filters { setup, kind } => {
            let store = SearchStore::new(read_config(&setup)?)?;
            let views = store.filters_of_type(GroupType::parse(&kind)?);
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        Cmd::Export { setup, toggle } => {
            let mut store = SearchStore::new(read_config(&setup)?)?;
            for description in &toggle {
                toggle_by_description(&mut store, description)?;
            }
            println!("{}", serde_json::to_string_pretty(&store.export_state())?);
        }
    }
    Ok(())
}
