// sparrow: command-line front end
//
//   sparrow infer    --weights W --input I --num-inputs N [--golden G] ...
//   sparrow convert  weights|inputs ...   (GraphChallenge TSV -> binary)
//   sparrow generate ...                  (seeded synthetic network + inputs)
//
// Logging goes to stderr through tracing-subscriber; RUST_LOG overrides the
// default `info` level. Classes go to stdout, one `input<TAB>class` per line.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use sparrow::data::{golden, tsv, SyntheticConfig};
use sparrow::{Backend, BackendDevice, CpuBackend, CpuDevice, DType, Element, Engine, EngineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sparse DNN inference engine", long_about = None)]
struct Cli {
    /// Enable debug logging (per-layer active rows, geometry)
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a batch of inputs
    Infer(InferArgs),
    /// Convert GraphChallenge TSV files into the binary formats
    #[command(subcommand)]
    Convert(ConvertCommand),
    /// Write a seeded random network and input batch
    Generate(GenerateArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Cpu,
    Cuda,
}

#[derive(Args, Debug)]
struct InferArgs {
    /// Weight file (SPWT)
    #[arg(long)]
    weights: PathBuf,
    /// Input file (SPIN)
    #[arg(long)]
    input: PathBuf,
    /// Number of input rows
    #[arg(long)]
    num_inputs: usize,
    /// Neurons per layer [default: from config or weight file]
    #[arg(long)]
    neurons: Option<usize>,
    /// Number of layers [default: from config or weight file]
    #[arg(long)]
    layers: Option<usize>,
    /// Bias added to every neuron [default: -0.3]
    #[arg(long, allow_hyphen_values = true)]
    bias: Option<f64>,
    /// Upper clamp of the activation [default: 32]
    #[arg(long)]
    clamp_max: Option<f64>,
    /// Engine configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Element type: f32 or f64 [default: the weight file's value width]
    #[arg(long)]
    dtype: Option<DType>,
    #[arg(long, value_enum, default_value_t = BackendKind::Cpu)]
    backend: BackendKind,
    /// CUDA device ordinal
    #[arg(long, default_value_t = 0)]
    ordinal: usize,
    /// Fast-memory budget per block for the CPU backend (bytes)
    #[arg(long)]
    shared_mem: Option<usize>,
    /// Golden categories file; check the result instead of printing classes
    #[arg(long)]
    golden: Option<PathBuf>,
    /// Print stage timings to stderr
    #[arg(long)]
    profile: bool,
}

#[derive(Subcommand, Debug)]
enum ConvertCommand {
    /// Convert n{N}-l{L}.tsv layer files
    Weights {
        /// Directory holding the layer files
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        neurons: usize,
        #[arg(long)]
        layers: usize,
        #[arg(long, default_value = "f32")]
        dtype: DType,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Convert a sparse-images-{N}.tsv input file
    Inputs {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        num_inputs: usize,
        #[arg(long)]
        neurons: usize,
        #[arg(long, default_value = "f32")]
        dtype: DType,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(long, default_value_t = 1024)]
    neurons: usize,
    #[arg(long, default_value_t = 120)]
    layers: usize,
    /// Nonzeros per output neuron per layer
    #[arg(long, default_value_t = 32)]
    fan_in: usize,
    #[arg(long, default_value_t = 60_000)]
    num_inputs: usize,
    /// Probability that an input pixel is set
    #[arg(long, default_value_t = 0.2)]
    density: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value = "f32")]
    dtype: DType,
    #[arg(long)]
    weights_out: PathBuf,
    #[arg(long)]
    inputs_out: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Infer(args) => infer(args),
        Command::Convert(cmd) => {
            convert(cmd)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Generate(args) => {
            generate(args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Read the fixed-size weight-file header without loading the whole file.
fn peek_weight_header(path: &Path) -> Result<sparrow::data::WeightHeader> {
    let mut head = [0u8; sparrow::data::format::WEIGHT_HEADER_LEN];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut head))
        .with_context(|| format!("reading header of {}", path.display()))?;
    Ok(sparrow::data::read_weight_header(&head)?)
}

fn infer(args: InferArgs) -> Result<ExitCode> {
    let header = peek_weight_header(&args.weights)?;
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default()
            .with_neurons(header.neurons as usize)
            .with_layers(header.layers as usize),
    };
    if let Some(n) = args.neurons {
        config.num_neurons_per_layer = n;
    }
    if let Some(l) = args.layers {
        config.num_layers = l;
    }
    if let Some(b) = args.bias {
        config.bias = b;
    }
    if let Some(m) = args.clamp_max {
        config.clamp_max = m;
    }
    let dtype = args.dtype.unwrap_or(header.dtype);

    match args.backend {
        BackendKind::Cpu => {
            let mut device = CpuDevice::new();
            if let Some(bytes) = args.shared_mem {
                device = device.with_shared_mem_per_block(bytes);
            }
            match dtype {
                DType::F32 => run_engine::<CpuBackend, f32>(device, config, &args),
                DType::F64 => run_engine::<CpuBackend, f64>(device, config, &args),
            }
        }
        BackendKind::Cuda => infer_cuda(config, dtype, &args),
    }
}

#[cfg(feature = "cuda")]
fn infer_cuda(config: EngineConfig, dtype: DType, args: &InferArgs) -> Result<ExitCode> {
    use sparrow::{CudaBackend, CudaDevice};
    let device = CudaDevice::new(args.ordinal)?;
    match dtype {
        DType::F32 => run_engine::<CudaBackend, f32>(device, config, args),
        DType::F64 => run_engine::<CudaBackend, f64>(device, config, args),
    }
}

#[cfg(not(feature = "cuda"))]
fn infer_cuda(_config: EngineConfig, _dtype: DType, _args: &InferArgs) -> Result<ExitCode> {
    bail!("this binary was built without the `cuda` feature")
}

fn run_engine<B: Backend, T: Element>(
    device: B::Device,
    config: EngineConfig,
    args: &InferArgs,
) -> Result<ExitCode> {
    tracing::info!(
        device = %device.name(),
        dtype = %T::DTYPE,
        neurons = config.num_neurons_per_layer,
        layers = config.num_layers,
        bias = config.bias,
        "engine configuration"
    );
    let engine = Engine::<B, T>::new(device, &args.weights, config)
        .with_context(|| format!("loading {}", args.weights.display()))?;
    let out = engine
        .infer_detailed(&args.input, args.num_inputs)
        .with_context(|| format!("running {}", args.input.display()))?;

    if args.profile {
        eprintln!("{}", engine.load_profile());
        eprintln!("{}", out.profile);
    }

    if let Some(path) = &args.golden {
        let categories = golden::read_categories(path)?;
        let ok = golden::matches_categories(&out.classes, &categories);
        let found = golden::categories_from_classes(&out.classes).len();
        println!(
            "golden check {}: {found} categorized inputs, {} expected",
            if ok { "passed" } else { "FAILED" },
            categories.len()
        );
        return Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    let stdout = std::io::stdout();
    let mut w = BufWriter::new(stdout.lock());
    for (i, class) in out.classes.iter().enumerate() {
        writeln!(w, "{i}\t{class}")?;
    }
    w.flush()?;
    Ok(ExitCode::SUCCESS)
}

fn convert(cmd: ConvertCommand) -> Result<()> {
    let (bytes, output) = match cmd {
        ConvertCommand::Weights {
            dir,
            neurons,
            layers,
            dtype,
            output,
        } => (tsv::convert_weights(&dir, neurons, layers, dtype)?, output),
        ConvertCommand::Inputs {
            input,
            num_inputs,
            neurons,
            dtype,
            output,
        } => (tsv::convert_inputs(&input, num_inputs, neurons, dtype)?, output),
    };
    std::fs::write(&output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    tracing::info!(path = %output.display(), bytes = bytes.len(), "wrote");
    Ok(())
}

fn generate(args: GenerateArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.density) {
        bail!("--density must be within 0..=1, got {}", args.density);
    }
    let cfg = SyntheticConfig::new(args.neurons, args.layers)
        .fan_in(args.fan_in)
        .num_inputs(args.num_inputs)
        .input_density(args.density)
        .seed(args.seed);
    let (neurons, inputs) = (args.neurons as u32, args.num_inputs as u32);
    let (weights, batch) = match args.dtype {
        DType::F32 => (
            sparrow::data::encode_weights(neurons, &cfg.network::<f32>()),
            sparrow::data::encode_inputs(inputs, neurons, &cfg.inputs::<f32>()),
        ),
        DType::F64 => (
            sparrow::data::encode_weights(neurons, &cfg.network::<f64>()),
            sparrow::data::encode_inputs(inputs, neurons, &cfg.inputs::<f64>()),
        ),
    };
    for (path, bytes) in [(&args.weights_out, &weights), (&args.inputs_out, &batch)] {
        std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "wrote");
    }
    Ok(())
}
