//! decisionflow CLI
//!
//! Run with: decisionflow analyze request.json
//! Configuration comes from DECISIONFLOW_* environment variables;
//! the model key from ANTHROPIC_API_KEY.

use anyhow::{Context, Result};
use decisionflow::{
    audit::{MemorySink, MultiSink, ObservabilitySink, TracingSink},
    prompts::{BuiltinPrompts, DirectoryPrompts, PromptProvider, PROMPT_NAMES},
    validation::{ContractName, ContractValidator, Expectations},
    AnthropicCaller, Orchestrator, PipelineConfig,
};
use serde_json::Value;
use std::io::Read;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Stdout carries JSON results; logs go to stderr
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    match args.get(1).map(|s| s.as_str()) {
        Some("analyze") => {
            // analyze <request.json|-> [--audit] [--prompts=<dir>]
            let Some(path) = positional(&args[2..]) else {
                anyhow::bail!("Usage: decisionflow analyze <request.json|-> [--audit] [--prompts=<dir>]");
            };
            let show_audit = args.iter().any(|a| a == "--audit");
            let prompt_dir = flag_value(&args, "--prompts=");
            run_analyze(&path, show_audit, prompt_dir.as_deref()).await
        }
        Some("validate") => {
            let Some(path) = positional(&args[2..]) else {
                anyhow::bail!("Usage: decisionflow validate <request.json|->");
            };
            run_validate(&path)
        }
        Some("contracts") => run_contracts(args.get(2).map(|s| s.as_str())),
        Some("prompts") => run_prompts(args.get(2).map(|s| s.as_str())),
        Some("--help") | Some("-h") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            anyhow::bail!("unknown command: {}", other)
        }
    }
}

fn print_usage() {
    println!("decisionflow - staged decision analysis");
    println!();
    println!("USAGE:");
    println!("  decisionflow analyze <request.json|-> [--audit] [--prompts=<dir>]");
    println!("  decisionflow validate <request.json|->");
    println!("  decisionflow contracts [name]");
    println!("  decisionflow prompts [dir]");
}

fn positional(args: &[String]) -> Option<String> {
    args.iter().find(|a| !a.starts_with("--")).cloned()
}

fn flag_value(args: &[String], prefix: &str) -> Option<String> {
    args.iter()
        .find_map(|a| a.strip_prefix(prefix))
        .map(|v| v.to_string())
}

fn read_payload(path: &str) -> Result<Value> {
    let text = if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?
    };
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path))
}

async fn run_analyze(path: &str, show_audit: bool, prompt_dir: Option<&str>) -> Result<()> {
    let payload = read_payload(path)?;
    let config = PipelineConfig::from_env()?;
    let model = Arc::new(AnthropicCaller::from_env(config.model.model.clone())?);

    let prompts: Arc<dyn PromptProvider> = match prompt_dir {
        Some(dir) => Arc::new(DirectoryPrompts::new(dir)),
        None => Arc::new(BuiltinPrompts),
    };
    let memory = Arc::new(MemorySink::new());
    let sink: Arc<dyn ObservabilitySink> = Arc::new(MultiSink::new(vec![
        Arc::new(TracingSink),
        memory.clone(),
    ]));

    let orchestrator = Orchestrator::new(config, model, prompts, sink)?;
    let result = orchestrator.run_json(payload).await;

    if show_audit {
        for record in memory.records() {
            eprintln!("{}", serde_json::to_string(&record)?);
        }
    }

    match result {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.envelope())?);
            std::process::exit(1);
        }
    }
}

fn run_validate(path: &str) -> Result<()> {
    let payload = read_payload(path)?;
    let config = PipelineConfig::from_env()?;
    let validator = ContractValidator::new(&config.limits)?;

    match validator.validate(ContractName::DecisionRequest, &payload, &Expectations::none()) {
        Ok(()) => {
            println!("✅ {} satisfies the request contract", path);
            Ok(())
        }
        Err(violations) => {
            println!("❌ {} violation(s):", violations.len());
            for v in &violations {
                println!("   {}", v);
            }
            std::process::exit(1);
        }
    }
}

fn run_contracts(name: Option<&str>) -> Result<()> {
    let config = PipelineConfig::from_env()?;
    let mut out = serde_json::Map::new();
    for contract in ContractName::ALL {
        if name.map_or(true, |n| n == contract.as_str()) {
            out.insert(contract.as_str().to_string(), contract.schema(&config.limits));
        }
    }
    if out.is_empty() {
        let known: Vec<&str> = ContractName::ALL.iter().map(|c| c.as_str()).collect();
        anyhow::bail!("unknown contract; expected one of: {}", known.join(", "));
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(out))?);
    Ok(())
}

fn run_prompts(dir: Option<&str>) -> Result<()> {
    let config = PipelineConfig::from_env()?;
    let version = &config.versions.logic_version;

    match dir {
        Some(dir) => {
            let prompts = DirectoryPrompts::new(dir);
            let missing = prompts.missing(version);
            println!("📁 {} (logic version {})", dir, version);
            for name in PROMPT_NAMES {
                let mark = if missing.contains(&name) { "❌" } else { "✅" };
                println!("   {} {}", mark, prompts.path_for(name, version).display());
            }
            if !missing.is_empty() {
                anyhow::bail!("{} prompt(s) missing", missing.len());
            }
        }
        None => {
            println!("📦 built-in prompts (logic version {})", version);
            for name in PROMPT_NAMES {
                let mark = if BuiltinPrompts.get(name, version).is_ok() { "✅" } else { "❌" };
                println!("   {} {}", mark, name);
            }
        }
    }
    Ok(())
}
