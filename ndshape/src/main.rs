#![forbid(unsafe_code)]

mod config;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use ndshape_ast::Type;
use ndshape_parse::{ParseConfig, try_parse_type};
use ndshape_rt_native::MasterBuffer;

use crate::config::{Settings, load_settings};

#[derive(Parser, Debug)]
#[command(name = "ndshape", version, about = "Datashape matching and typed buffer layout")]
struct Cli {
    /// Path to ndshape.toml (default: ./ndshape.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Match a pattern type against a concrete type; prints yes or no.
    Match { pattern: String, concrete: String },

    /// Apply a function signature to a tuple of argument types.
    Typecheck {
        function: String,
        args: String,

        #[arg(long)]
        json: bool,
    },

    /// Allocate a buffer for a concrete type and report its layout.
    Layout {
        ty: String,

        /// Comma separated path to an element, e.g. `--index 1,0`
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        index: Vec<i64>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, serde::Serialize)]
struct TypecheckReport {
    result: String,
    outer_dims: usize,
}

#[derive(Debug, serde::Serialize)]
struct ElementReport {
    index: Vec<i64>,
    ty: String,
    /// Byte offset from the start of the root block; `None` behind a reference.
    offset: Option<usize>,
}

#[derive(Debug, serde::Serialize)]
struct LayoutReport {
    ty: String,
    datasize: i64,
    align: u16,
    ndim: u32,
    nbytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    element: Option<ElementReport>,
}

fn parse_arg(src: &str, config: &ParseConfig) -> miette::Result<Type> {
    try_parse_type(src, config).map_err(|e| miette::Report::new(e).with_source_code(src.to_string()))
}

fn print_json<T: serde::Serialize>(value: &T) -> miette::Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn run_match(settings: &Settings, pattern: &str, concrete: &str) -> miette::Result<()> {
    let p = parse_arg(pattern, &settings.parse)?;
    let c = parse_arg(concrete, &settings.parse)?;
    let matched = ndshape_core::match_types(&p, &c)?;
    println!("{}", if matched { "yes" } else { "no" });
    Ok(())
}

fn run_typecheck(settings: &Settings, function: &str, args: &str, json: bool) -> miette::Result<()> {
    let sig = parse_arg(function, &settings.parse)?;
    let args = parse_arg(args, &settings.parse)?;
    let (result, outer_dims) = ndshape_core::typecheck(&sig, &args)?;
    if json {
        return print_json(&TypecheckReport {
            result: result.to_string(),
            outer_dims,
        });
    }
    println!("{result}");
    println!("outer dims: {outer_dims}");
    Ok(())
}

fn run_layout(settings: &Settings, ty: &str, index: &[i64], json: bool) -> miette::Result<()> {
    parse_arg(ty, &settings.parse)?;
    let buf = MasterBuffer::from_type_string_in(
        ty,
        &settings.parse,
        settings.flags,
        ndshape_rt_native::SystemAllocator,
    )?;

    let element = if index.is_empty() {
        None
    } else {
        let handle = buf.subtree(index)?;
        let offset = handle
            .address()?
            .addr()
            .checked_sub(buf.as_ptr().addr())
            .filter(|o| *o < buf.nbytes());
        Some(ElementReport {
            index: index.to_vec(),
            ty: handle.ty().to_string(),
            offset,
        })
    };

    let t = buf.ty();
    let report = LayoutReport {
        ty: t.to_string(),
        datasize: t.datasize(),
        align: t.align(),
        ndim: t.ndim(),
        nbytes: buf.nbytes(),
        element,
    };
    if json {
        return print_json(&report);
    }

    println!("type:     {}", report.ty);
    println!("datasize: {}", report.datasize);
    println!("align:    {}", report.align);
    println!("ndim:     {}", report.ndim);
    if let Some(e) = &report.element {
        let path: Vec<String> = e.index.iter().map(i64::to_string).collect();
        match e.offset {
            Some(offset) => println!("[{}]: {} at offset {offset}", path.join(", "), e.ty),
            None => println!("[{}]: {} outside the root block", path.join(", "), e.ty),
        }
    }
    Ok(())
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().into_diagnostic()?;
    let settings = load_settings(cli.config.as_deref(), &cwd)?;
    logging::init_logging(settings.log.as_deref());
    if let Some(path) = &settings.path {
        tracing::debug!(config = %path.display(), "loaded config");
    }

    match cli.cmd {
        Cmd::Match { pattern, concrete } => run_match(&settings, &pattern, &concrete),
        Cmd::Typecheck {
            function,
            args,
            json,
        } => run_typecheck(&settings, &function, &args, json),
        Cmd::Layout { ty, index, json } => run_layout(&settings, &ty, &index, json),
    }
}
