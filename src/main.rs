mod devirtualizer;
mod hierarchy;
mod ir;
mod keep;
mod resolver;
mod scan;
mod walk;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::devirtualizer::{DevirtualizerConfig, DevirtualizerMetrics, MethodDevirtualizer};
use crate::hierarchy::ClassHierarchyAnalysis;
use crate::ir::{ClassId, Program};
use crate::keep::KeepRules;
use crate::scan::{build_class_scope, export_program, scan_inputs};

/// CLI arguments for devirt execution.
#[derive(Parser, Debug)]
#[command(
    name = "devirt",
    about = "Turn instance methods that never need dynamic dispatch into static methods.",
    version
)]
struct Cli {
    /// Program store: a JSON file or a directory of them.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Library stores; never rewritten.
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long, value_name = "PATH")]
    metrics: Option<PathBuf>,
    /// Only staticize methods of these classes. Defaults to every input class.
    #[arg(long, value_name = "CLASS")]
    target: Vec<String>,
    /// `Class` or `Class.method` to leave untouched.
    #[arg(long, value_name = "PATTERN")]
    keep: Vec<String>,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, value_enum, value_name = "POOL")]
    enable: Vec<Pool>,
    #[arg(long, value_enum, value_name = "POOL")]
    disable: Vec<Pool>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Pool {
    VmethodsNotUsingThis,
    DmethodsNotUsingThis,
    VmethodsUsingThis,
    DmethodsUsingThis,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli)
}

fn init_tracing() {
    if let Ok(filter) = EnvFilter::try_from_env("DEVIRT_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(io::stderr)
            .init();
    }
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }

    let started_at = Instant::now();
    let config = load_config(&cli)?;
    let scan = scan_inputs(&cli.input, &cli.classpath)?;
    let class_count = scan.class_count;
    let mut program = build_class_scope(scan.stores)?;
    let targets = resolve_targets(&program, &cli.target)?;
    let policy = KeepRules::from_patterns(&cli.keep);

    let metrics = MethodDevirtualizer::new(config, &ClassHierarchyAnalysis, &policy)
        .devirtualize_methods(&mut program, targets.as_deref())
        .context("devirtualization failed")?;
    info!(?metrics, "devirtualization finished");

    let mut writer = output_writer(cli.output.as_deref())?;
    write_json(&mut writer, &export_program(&program)).context("failed to write program")?;
    if let Some(path) = cli.metrics.as_deref() {
        let mut file =
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?;
        write_json(&mut file, &metrics).context("failed to write metrics")?;
    } else if !cli.quiet {
        eprintln!("{}", metrics_summary(&metrics));
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} classes={}",
            started_at.elapsed().as_millis(),
            class_count
        );
    }

    Ok(())
}

/// Start from the config file (or defaults) and apply `--enable`/`--disable`.
fn load_config(cli: &Cli) -> Result<DevirtualizerConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_slice(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => DevirtualizerConfig::default(),
    };
    for pool in &cli.enable {
        *pool_flag(&mut config, *pool) = true;
    }
    for pool in &cli.disable {
        *pool_flag(&mut config, *pool) = false;
    }
    Ok(config)
}

fn pool_flag(config: &mut DevirtualizerConfig, pool: Pool) -> &mut bool {
    match pool {
        Pool::VmethodsNotUsingThis => &mut config.vmethods_not_using_this,
        Pool::DmethodsNotUsingThis => &mut config.dmethods_not_using_this,
        Pool::VmethodsUsingThis => &mut config.vmethods_using_this,
        Pool::DmethodsUsingThis => &mut config.dmethods_using_this,
    }
}

fn resolve_targets(program: &Program, names: &[String]) -> Result<Option<Vec<ClassId>>> {
    if names.is_empty() {
        return Ok(None);
    }
    let mut targets = Vec::with_capacity(names.len());
    for name in names {
        let Some(class_id) = program.class_by_name(name) else {
            anyhow::bail!("target class not found: {name}");
        };
        if program.class(class_id).is_external {
            anyhow::bail!("target class is on the classpath: {name}");
        }
        targets.push(class_id);
    }
    Ok(Some(targets))
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn write_json<W: Write + ?Sized, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value).context("failed to serialize JSON")?;
    writer.write_all(b"\n").context("failed to write JSON")?;
    Ok(())
}

fn metrics_summary(metrics: &DevirtualizerMetrics) -> String {
    format!(
        "devirtualized: virtual_calls={} super_calls={} direct_calls={} methods_not_using_this={} methods_using_this={}",
        metrics.num_virtual_calls,
        metrics.num_super_calls,
        metrics.num_direct_calls,
        metrics.num_methods_not_using_this,
        metrics.num_methods_using_this
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("devirt").chain(args.iter().copied()))
            .expect("parse arguments")
    }

    fn scenario_store() -> Value {
        json!({
            "classes": [{
                "name": "C",
                "methods": [
                    {
                        "name": "foo",
                        "kind": "virtual",
                        "return": "V",
                        "code": {
                            "registers": 1,
                            "instructions": [
                                { "op": "load-param-object", "dest": 0 },
                                { "op": "other", "mnemonic": "return-void" }
                            ]
                        }
                    },
                    {
                        "name": "main",
                        "kind": "static",
                        "return": "V",
                        "code": {
                            "registers": 1,
                            "instructions": [
                                {
                                    "op": "invoke",
                                    "kind": "virtual",
                                    "method": { "owner": "C", "name": "foo", "return": "V" },
                                    "args": { "compact": [0] }
                                },
                                { "op": "other", "mnemonic": "return-void" }
                            ]
                        }
                    }
                ]
            }]
        })
    }

    #[test]
    fn enable_and_disable_override_config_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, br#"{ "dmethods_using_this": true }"#).expect("write config");
        let cli = parse(&[
            "--input",
            "in.json",
            "--config",
            config_path.to_str().expect("utf-8 path"),
            "--enable",
            "vmethods-using-this",
            "--disable",
            "dmethods-not-using-this",
        ]);

        let config = load_config(&cli).expect("load config");

        assert_eq!(
            DevirtualizerConfig {
                vmethods_not_using_this: true,
                dmethods_not_using_this: false,
                vmethods_using_this: true,
                dmethods_using_this: true,
            },
            config
        );
    }

    #[test]
    fn run_rewrites_program_and_reports_metrics() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let input = temp_dir.path().join("app.json");
        let output = temp_dir.path().join("out.json");
        let metrics = temp_dir.path().join("metrics.json");
        fs::write(&input, serde_json::to_vec(&scenario_store()).expect("serialize"))
            .expect("write input");
        let cli = parse(&[
            "--input",
            input.to_str().expect("utf-8 path"),
            "--output",
            output.to_str().expect("utf-8 path"),
            "--metrics",
            metrics.to_str().expect("utf-8 path"),
            "--target",
            "C",
            "--disable",
            "dmethods-not-using-this",
        ]);

        run(cli).expect("run");

        let program: Value =
            serde_json::from_slice(&fs::read(&output).expect("read output")).expect("parse output");
        let foo = &program["classes"][0]["methods"][0];
        assert_eq!("static", foo["kind"]);
        assert_eq!(json!([{ "op": "other", "mnemonic": "return-void" }]), foo["code"]["instructions"]);
        let call = &program["classes"][0]["methods"][1]["code"]["instructions"][0];
        assert_eq!("static", call["kind"]);
        assert_eq!(json!({ "compact": [] }), call["args"]);

        let metrics: DevirtualizerMetrics =
            serde_json::from_slice(&fs::read(&metrics).expect("read metrics"))
                .expect("parse metrics");
        assert_eq!(
            DevirtualizerMetrics {
                num_virtual_calls: 1,
                num_methods_not_using_this: 1,
                ..Default::default()
            },
            metrics
        );
    }

    #[test]
    fn unknown_target_is_rejected() {
        let program = Program::default();

        let error = resolve_targets(&program, &["Missing".to_string()]).expect_err("missing");

        assert!(error.to_string().contains("Missing"));
    }

    #[test]
    fn missing_input_is_rejected() {
        let cli = parse(&["--input", "/nonexistent/devirt-input.json"]);

        assert!(run(cli).is_err());
    }
}
