// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use duraflow_rs::{
    FileStateStore, FlowConfig, FlowEngine, FlowError, FlowEvent, FlowInvokeOptions, FlowOutcome,
    ListFilter, Operation, Schema,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding persisted run state
    #[arg(long, default_value = ".duraflow/runs")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a flow once and print the resulting operation
    Run {
        /// Name of a registered flow
        name: String,

        /// Input value as JSON (bare strings also accepted)
        #[arg(short, long)]
        input: Option<String>,

        /// Print chunks as they are produced
        #[arg(long)]
        stream: bool,

        /// Reuse an existing run lineage
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Run a flow over every input in a JSON array file
    BatchRun {
        name: String,

        /// Path to a JSON file containing an array of inputs
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Resume an interrupted run with a payload
    Resume {
        run_id: String,

        /// Resume payload as JSON
        #[arg(long)]
        resume: String,
    },
    /// List registered flows and persisted runs
    List,
    /// Serve registered flows over HTTP
    Serve {
        #[arg(short, long, default_value_t = 3400)]
        port: u16,
    },
}

/// Parse CLI-provided JSON, falling back to a bare string
fn parse_value(raw: Option<&str>) -> Value {
    match raw {
        None => Value::Null,
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

fn fail(err: FlowError) -> ! {
    eprintln!("error: {err}");
    println!("{}", err.kind());
    std::process::exit(1);
}

/// Print the operation; a terminal error exits non-zero with its kind last
fn finish(operation: Operation) -> ! {
    println!(
        "{}",
        serde_json::to_string_pretty(&operation).expect("operation serializes")
    );
    if let Some(error) = operation.error {
        eprintln!("error: {}", error.message);
        println!("{}", error.kind);
        std::process::exit(1);
    }
    std::process::exit(0);
}

/// Demo flows exercised by the CLI and served by `serve`
async fn register_flows(engine: &FlowEngine) -> duraflow_rs::Result<()> {
    engine
        .define_flow(
            FlowConfig::new("greet")
                .input_schema(Schema::string())
                .output_schema(Schema::string())
                .metadata("description", json!("Greets the given name")),
            |input, ctx| async move {
                let name = input.as_str().unwrap_or("world").to_string();
                let built = ctx
                    .run("build", || async move { Ok(json!(format!("Hello, {name}"))) })
                    .await?;
                let text = format!("{}!", built.as_str().unwrap_or_default());
                ctx.emit(json!(text.clone())).await;
                Ok(FlowOutcome::complete(text))
            },
        )
        .await?;

    engine
        .define_flow(
            FlowConfig::new("shout")
                .input_schema(Schema::array(Schema::string()))
                .output_schema(Schema::array(Schema::string()))
                .metadata("description", json!("Uppercases every word, fanned out")),
            |input, ctx| async move {
                let words = input.as_array().cloned().unwrap_or_default();
                let shouted = ctx
                    .run_map("upper", words, |_, word| async move {
                        Ok(json!(word.as_str().unwrap_or_default().to_uppercase()))
                    })
                    .await?;
                Ok(FlowOutcome::Complete(json!(shouted)))
            },
        )
        .await?;

    engine
        .define_flow(
            FlowConfig::new("publish")
                .input_schema(Schema::string())
                .metadata(
                    "description",
                    json!("Drafts text, then waits for human approval"),
                ),
            |input, ctx| async move {
                let draft = ctx
                    .run("draft", || async move {
                        Ok(json!(format!("DRAFT: {}", input.as_str().unwrap_or_default())))
                    })
                    .await?;
                match ctx.resume_payload() {
                    Some(decision) if decision.get("approved") == Some(&json!(true)) => {
                        Ok(FlowOutcome::Complete(json!({ "published": draft })))
                    }
                    Some(_) => Err(FlowError::from("approval was denied")),
                    None => Ok(FlowOutcome::pending(json!({ "awaiting": "approval" }))),
                }
            },
        )
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let store = Arc::new(FileStateStore::new(args.state_dir));
    let engine = Arc::new(FlowEngine::new(store));
    if let Err(e) = register_flows(&engine).await {
        fail(e);
    }

    match args.command {
        Commands::Run {
            name,
            input,
            stream,
            run_id,
        } => {
            let input = parse_value(input.as_deref());
            let opts = FlowInvokeOptions { run_id, auth: None };
            if stream {
                let mut rx = match engine.stream_flow(&name, input, opts).await {
                    Ok(rx) => rx,
                    Err(e) => fail(e),
                };
                while let Some(event) = rx.recv().await {
                    match event {
                        FlowEvent::Chunk { index, content } => {
                            println!("chunk[{index}]: {content}");
                        }
                        FlowEvent::Done(operation) => finish(operation),
                    }
                }
                fail(FlowError::from("stream ended without a final operation"));
            } else {
                match engine.run_flow(&name, input, opts).await {
                    Ok(operation) => finish(operation),
                    Err(e) => fail(e),
                }
            }
        }
        Commands::BatchRun { name, input } => {
            let raw = match tokio::fs::read_to_string(&input).await {
                Ok(raw) => raw,
                Err(e) => fail(e.into()),
            };
            let inputs: Vec<Value> = match serde_json::from_str(&raw) {
                Ok(inputs) => inputs,
                Err(e) => fail(e.into()),
            };
            let operations = match engine
                .run_batch(&name, inputs, FlowInvokeOptions::default())
                .await
            {
                Ok(operations) => operations,
                Err(e) => fail(e),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&operations).expect("operations serialize")
            );
            if let Some(error) = operations.iter().find_map(|op| op.error.as_ref()) {
                eprintln!("error: {}", error.message);
                println!("{}", error.kind);
                std::process::exit(1);
            }
        }
        Commands::Resume { run_id, resume } => {
            let payload = parse_value(Some(&resume));
            match engine.resume_flow(&run_id, payload, None).await {
                Ok(operation) => finish(operation),
                Err(e) => fail(e),
            }
        }
        Commands::List => {
            let flows = engine.list_flows().await;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "flows": flows }))
                    .expect("summaries serialize")
            );
            match engine.list_runs(ListFilter::default()).await {
                Ok(page) => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "runs": page }))
                        .expect("page serializes")
                ),
                Err(e) => fail(e),
            }
        }
        Commands::Serve { port } => {
            if let Err(e) = duraflow_rs::server::serve(engine, port).await {
                fail(e);
            }
        }
    }
}
