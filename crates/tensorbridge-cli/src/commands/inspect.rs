//! Inspect command - list a model's tensors.

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use serde::Serialize;
use tracing::info;

use tensorbridge_inference::{InferenceSession, InterpreterOptions, NativeEngine, TensorDescriptor};

use super::{load_options, with_engine, EngineKind};

/// Arguments for the inspect command.
#[derive(Args)]
pub struct InspectArgs {
    /// Model file (ONNX)
    model: PathBuf,

    /// Engine used to load the model
    #[arg(short, long, value_enum, default_value = "ort")]
    engine: EngineKind,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

/// A tensor entry; `error` is set when the engine type has no mapping.
#[derive(Serialize)]
struct TensorEntry {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    descriptor: Option<TensorDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ModelReport {
    inputs: Vec<TensorEntry>,
    outputs: Vec<TensorEntry>,
}

pub async fn run(args: InspectArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let options = load_options(config_path)?;
    info!("Inspecting {} with {:?}", args.model.display(), args.engine);

    let report = with_engine!(args.engine, |E| inspect_model::<E>(&args.model, &options))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_section("Inputs", &report.inputs);
        print_section("Outputs", &report.outputs);
    }
    Ok(())
}

fn inspect_model<E: NativeEngine>(model: &Path, options: &InterpreterOptions) -> anyhow::Result<ModelReport> {
    let mut session = InferenceSession::<E>::from_file(model, options)?;

    let entry = |index: usize, result: tensorbridge_inference::Result<TensorDescriptor>| match result {
        Ok(descriptor) => TensorEntry {
            index,
            descriptor: Some(descriptor),
            error: None,
        },
        Err(e) => TensorEntry {
            index,
            descriptor: None,
            error: Some(e.to_string()),
        },
    };

    let inputs = (0..session.input_tensor_count()?)
        .map(|i| entry(i, session.input_tensor(i)))
        .collect();
    let outputs = (0..session.output_tensor_count()?)
        .map(|i| entry(i, session.output_tensor(i)))
        .collect();

    session.close();
    Ok(ModelReport { inputs, outputs })
}

fn print_section(title: &str, entries: &[TensorEntry]) {
    println!("{} ({})", style(title).bold(), entries.len());
    for entry in entries {
        match (&entry.descriptor, &entry.error) {
            (Some(d), _) => println!(
                "  [{}] {}  {}  {}",
                entry.index,
                style(d.name()).cyan(),
                d.data_type(),
                d.shape()
            ),
            (None, Some(error)) => println!("  [{}] {}", entry.index, style(error).red()),
            (None, None) => {}
        }
    }
}
