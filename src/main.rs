//! spindle CLI
//!
//! Loads a model, feeds it a prompt, and streams generated text to stdout
//! until a stop condition is hit.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spindle::engine::llama::LlamaRuntime;
use spindle::{GenerationSession, RunConfig};

const USAGE: &str = "\
usage: spindle [options]

options:
  -h, --help                show this help message and exit
  -m, --model FNAME         model path (required unless set in --config)
  -p, --prompt PROMPT       prompt to start generation with
  -f, --file FNAME          prompt file to start generation
  -r, --reverse-prompt STR  stop sequence; halts generation when it appears
                            as a suffix of the output (repeatable)
  -s, --seed N              RNG seed (default: 0 = random)
  -t, --threads N           threads used during evaluation (default: 4)
  -n, --n-predict N         max tokens to sample (default: unlimited)
  -c, --ctx-size N          size of the prompt context (default: 2048)
  -b, --batch-size N        batch size for prompt processing (default: 8)
  --keep N                  tokens to keep from the initial prompt on
                            context shift (default: 0, -1 = all)
  --temp N                  temperature (default: 0.8)
  --top-k N                 top-k sampling (default: 40)
  --top-p N                 top-p sampling (default: 0.95)
  --repeat-penalty N        penalize repeated tokens (default: 1.1)
  --repeat-last-n N         window considered for the penalty (default: 64)
  --ignore-eos              continue generating past end of stream
  --n-gpu-layers N          layers to offload to GPU (default: 0)
  --config FNAME            load a JSON run config (flags override it)
";

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("spindle=info".parse().unwrap()))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match parse_args(&args) {
        Ok(Some(config)) => config,
        Ok(None) => {
            print!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("run with --help for usage");
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let prompt = config.resolve_prompt()?;

    let runtime = LlamaRuntime::open(&config.model, config.engine.clone())?;
    let evaluator = runtime.evaluator()?;
    let session = GenerationSession::new(evaluator, &prompt, config.params.clone())?;

    let mut stdout = std::io::stdout();
    let reason = session.run(|fragment| {
        let _ = stdout.write_all(fragment.as_bytes());
        let _ = stdout.flush();
    })?;
    println!();

    info!(%reason, "generation finished");
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Option<RunConfig>, String> {
    // --config is applied first so explicit flags override file values
    let mut config = match args.iter().position(|a| a == "--config") {
        Some(pos) => {
            let path = args
                .get(pos + 1)
                .ok_or_else(|| "missing value for argument: --config".to_string())?;
            RunConfig::load(path).map_err(|e| e.to_string())?
        }
        None => RunConfig::default(),
    };
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-m" | "--model" => config.model = PathBuf::from(next_value(arg, &mut iter)?),
            "-p" | "--prompt" => config.prompt = Some(next_value(arg, &mut iter)?),
            "-f" | "--file" => {
                config.prompt_file = Some(PathBuf::from(next_value(arg, &mut iter)?))
            }
            "-r" | "--reverse-prompt" => {
                config.params.stop_sequences.push(next_value(arg, &mut iter)?)
            }
            "-s" | "--seed" => config.engine.seed = parse_num(arg, &next_value(arg, &mut iter)?)?,
            "-t" | "--threads" => {
                config.engine.n_threads = parse_num(arg, &next_value(arg, &mut iter)?)?
            }
            "-n" | "--n-predict" => {
                config.params.max_tokens = Some(parse_num(arg, &next_value(arg, &mut iter)?)?)
            }
            "-c" | "--ctx-size" => {
                config.engine.n_ctx = parse_num(arg, &next_value(arg, &mut iter)?)?
            }
            "-b" | "--batch-size" => {
                config.params.n_batch = parse_num(arg, &next_value(arg, &mut iter)?)?
            }
            "--keep" => config.params.n_keep = parse_num(arg, &next_value(arg, &mut iter)?)?,
            "--temp" => {
                config.params.sampling.temperature = parse_num(arg, &next_value(arg, &mut iter)?)?
            }
            "--top-k" => {
                config.params.sampling.top_k = parse_num(arg, &next_value(arg, &mut iter)?)?
            }
            "--top-p" => {
                config.params.sampling.top_p = parse_num(arg, &next_value(arg, &mut iter)?)?
            }
            "--repeat-penalty" => {
                config.params.sampling.repeat_penalty =
                    parse_num(arg, &next_value(arg, &mut iter)?)?
            }
            "--repeat-last-n" => {
                config.params.repeat_last_n = parse_num(arg, &next_value(arg, &mut iter)?)?
            }
            "--ignore-eos" => config.params.ignore_eos = true,
            "--n-gpu-layers" => {
                config.engine.n_gpu_layers = parse_num(arg, &next_value(arg, &mut iter)?)?
            }
            // Already applied above; just consume the value.
            "--config" => {
                next_value(arg, &mut iter)?;
            }
            unknown => return Err(format!("unknown argument: {unknown}")),
        }
    }

    if config.model.as_os_str().is_empty() {
        return Err("no model given (use -m or --config)".to_string());
    }

    config.validate();
    Ok(Some(config))
}

fn next_value(flag: &str, iter: &mut std::slice::Iter<'_, String>) -> Result<String, String> {
    iter.next()
        .cloned()
        .ok_or_else(|| format!("missing value for argument: {flag}"))
}

fn parse_num<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value for argument {flag}: {value}"))
}
