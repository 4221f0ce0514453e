use std::process;
use std::rc::Rc;

use clap::{Parser as ClapParser, Subcommand};
use log::LevelFilter;

use objcbridge::{
    Bridge, BridgeCreateInfo, HostValue, MethodSignature, TableRuntime, TypeEncoding,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print size and alignment of type encodings
    Size {
        #[arg(required = true, help = "Type encodings, e.g. i {CGPoint=dd}")]
        encodings: Vec<String>,
    },
    /// Break a method signature into its slots
    Signature {
        #[arg(help = "Complete signature, frame offsets allowed")]
        types: String,
    },
    /// Send a message to a class of the built-in runtime
    Send {
        class: String,
        message: String,
        #[arg(help = "Arguments: integers, floats, true, false, nil or strings")]
        arguments: Vec<String>,
    },
}

fn parse_argument(argument: &str) -> HostValue {
    match argument {
        "nil" => HostValue::Nil,
        "true" => HostValue::Bool(true),
        "false" => HostValue::Bool(false),
        _ => {
            if let Ok(value) = argument.parse::<i64>() {
                HostValue::Int(value)
            } else if let Ok(value) = argument.parse::<f64>() {
                HostValue::Float(value)
            } else {
                HostValue::from(argument)
            }
        }
    }
}

fn print_sizes(encodings: &[String]) -> Result<(), String> {
    for source in encodings {
        let encoding = TypeEncoding::parse(source).map_err(|err| err.to_string())?;
        match (encoding.size(), encoding.alignment()) {
            (Ok(size), Ok(alignment)) => {
                println!("{source}\t{encoding}\tsize {size}\talign {alignment}")
            }
            _ => println!("{source}\t{encoding}\tunsized"),
        }
    }
    Ok(())
}

fn print_signature(types: &str) -> Result<(), String> {
    let signature = MethodSignature::parse(types).map_err(|err| err.to_string())?;
    let offsets = signature.argument_offsets().map_err(|err| err.to_string())?;
    println!("signature  {signature}");
    println!("return     {}", signature.return_type());
    for (i, (argument, offset)) in signature.arguments().iter().zip(offsets).enumerate() {
        println!("slot {:<5} {argument}\toffset {offset}", i + 1);
    }
    println!("host arity {}", signature.host_arity());
    Ok(())
}

fn send(class: &str, message: &str, arguments: &[String]) -> Result<(), String> {
    let runtime = Rc::new(TableRuntime::new());
    let bridge = Bridge::new(runtime, BridgeCreateInfo::default());
    let target = bridge
        .find_class(class)
        .ok_or_else(|| format!("unknown class '{class}'"))?;
    let arguments: Vec<HostValue> = arguments.iter().map(|a| parse_argument(a)).collect();
    let result = target
        .perform(message, &arguments)
        .map_err(|err| err.to_string())?;
    match result {
        HostValue::Object(object) => {
            let description = object.description().map_err(|err| err.to_string())?;
            println!("{object} {description}");
        }
        other => println!("{other}"),
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let outcome = match &cli.command {
        Command::Size { encodings } => print_sizes(encodings),
        Command::Signature { types } => print_signature(types),
        Command::Send {
            class,
            message,
            arguments,
        } => send(class, message, arguments),
    };
    if let Err(err) = outcome {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}
