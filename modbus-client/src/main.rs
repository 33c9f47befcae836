//! Command-line Modbus client

use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use modbus_engine::client::*;
use modbus_engine::*;

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("{0}")]
    BadRange(#[from] InvalidRange),
    #[error("{0}")]
    BadInt(#[from] ParseIntError),
    #[error("bad character in bit string: {0}")]
    BadCharInBitString(char),
    #[error("{0}")]
    Request(#[from] RequestError),
    #[error("channel was shut down")]
    Shutdown,
}

impl From<InvalidRequest> for Error {
    fn from(err: InvalidRequest) -> Self {
        Error::Request(err.into())
    }
}

impl From<Shutdown> for Error {
    fn from(_: Shutdown) -> Self {
        Error::Shutdown
    }
}

#[derive(Parser)]
#[command(name = "modbus-client")]
#[command(about = "A command line program for making Modbus requests using the modbus-engine crate")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1", help = "Host name or IP address of the server")]
    host: String,

    #[arg(long, default_value_t = 502, help = "TCP port of the server")]
    port: u16,

    #[arg(long, help = "Use Modbus RTU over this serial port instead of TCP")]
    serial: Option<String>,

    #[arg(long, default_value_t = 9600, help = "Baud rate of the serial port")]
    baud_rate: u32,

    #[arg(short = 'i', long, default_value_t = 1, help = "The unit id of the Modbus server")]
    id: u8,

    #[arg(short = 't', long, default_value_t = 1000, help = "Response timeout in milliseconds")]
    timeout: u64,

    #[arg(short = 'r', long, default_value_t = 0, help = "Retransmissions after a response timeout")]
    retries: u32,

    #[arg(short = 'p', long, help = "Optional polling period in milliseconds")]
    period: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(name = "rc", about = "read coils")]
    ReadCoils(ReadArgs),

    #[command(name = "rdi", about = "read discrete inputs")]
    ReadDiscreteInputs(ReadArgs),

    #[command(name = "rhr", about = "read holding registers")]
    ReadHoldingRegisters(ReadArgs),

    #[command(name = "rir", about = "read input registers")]
    ReadInputRegisters(ReadArgs),

    #[command(name = "wsc", about = "write single coil")]
    WriteSingleCoil(WriteSingleCoilArgs),

    #[command(name = "wsr", about = "write single register")]
    WriteSingleRegister(WriteSingleRegisterArgs),

    #[command(name = "wmc", about = "write multiple coils")]
    WriteMultipleCoils(WriteMultipleArgs),

    #[command(name = "wmr", about = "write multiple registers")]
    WriteMultipleRegisters(WriteMultipleArgs),
}

#[derive(Args)]
struct ReadArgs {
    #[arg(short = 's', long, help = "the starting address")]
    start: u16,

    #[arg(short = 'q', long, help = "quantity of values")]
    quantity: u16,
}

#[derive(Args)]
struct WriteSingleCoilArgs {
    #[arg(short = 'i', long, help = "the address of the coil")]
    index: u16,

    #[arg(short = 'v', long, help = "the value of the coil (true or false)")]
    value: bool,
}

#[derive(Args)]
struct WriteSingleRegisterArgs {
    #[arg(short = 'i', long, help = "the address of the register")]
    index: u16,

    #[arg(short = 'v', long, help = "the value of the register")]
    value: u16,
}

#[derive(Args)]
struct WriteMultipleArgs {
    #[arg(short = 's', long, help = "the starting address")]
    start: u16,

    #[arg(
        short = 'v',
        long,
        help = "coils as a string of 1 and 0 with the first coil last (e.g. 10100011), registers as a comma delimited list (e.g. 1,4,7)"
    )]
    values: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    if let Err(ref e) = run().await {
        println!("error: {e}");
    }

    Ok(())
}

async fn run() -> Result<(), Error> {
    let cli = Cli::parse();

    let config = ChannelConfig::default().with_decode_level(PduDecodeLevel::DataValues.into());

    let mut channel = match &cli.serial {
        Some(path) => spawn_rtu_client_task(
            path,
            SerialSettings::with_baud_rate(cli.baud_rate),
            config,
            None,
        ),
        None => spawn_tcp_client_task(&cli.host, cli.port, config, None),
    };
    channel.connect().await?;

    let params = RequestParam::new(UnitId::new(cli.id), Duration::from_millis(cli.timeout))
        .with_retries(cli.retries);

    let result = match cli.period {
        None => run_command(&cli.command, &mut channel, params).await,
        Some(period_ms) => {
            let period = Duration::from_millis(period_ms);
            loop {
                if let Err(err) = run_command(&cli.command, &mut channel, params).await {
                    break Err(err);
                }
                tokio::time::sleep(period).await
            }
        }
    };

    channel.disconnect().await?;
    result
}

async fn run_command(
    command: &Command,
    channel: &mut Channel,
    params: RequestParam,
) -> Result<(), Error> {
    match command {
        Command::ReadCoils(args) => {
            let range = AddressRange::try_from(args.start, args.quantity)?;
            for x in channel.read_coils(params, range).await? {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Command::ReadDiscreteInputs(args) => {
            let range = AddressRange::try_from(args.start, args.quantity)?;
            for x in channel.read_discrete_inputs(params, range).await? {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Command::ReadHoldingRegisters(args) => {
            let range = AddressRange::try_from(args.start, args.quantity)?;
            for x in channel.read_holding_registers(params, range).await? {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Command::ReadInputRegisters(args) => {
            let range = AddressRange::try_from(args.start, args.quantity)?;
            for x in channel.read_input_registers(params, range).await? {
                println!("index: {} value: {}", x.index, x.value)
            }
        }
        Command::WriteSingleCoil(args) => {
            let x = channel
                .write_single_coil(params, Indexed::new(args.index, args.value))
                .await?;
            println!("index: {} value: {}", x.index, x.value)
        }
        Command::WriteSingleRegister(args) => {
            let x = channel
                .write_single_register(params, Indexed::new(args.index, args.value))
                .await?;
            println!("index: {} value: {}", x.index, x.value)
        }
        Command::WriteMultipleCoils(args) => {
            let values = parse_bit_values(&args.values)?;
            let range = channel
                .write_multiple_coils(params, WriteMultiple::from(args.start, values)?)
                .await?;
            println!("wrote {} coils starting at {}", range.count, range.start)
        }
        Command::WriteMultipleRegisters(args) => {
            let values = parse_register_values(&args.values)?;
            let range = channel
                .write_multiple_registers(params, WriteMultiple::from(args.start, values)?)
                .await?;
            println!("wrote {} registers starting at {}", range.count, range.start)
        }
    }
    Ok(())
}

fn parse_bit_values(values_str: &str) -> Result<Vec<bool>, Error> {
    // the right-most character is the first coil
    values_str
        .chars()
        .rev()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            _ => Err(Error::BadCharInBitString(c)),
        })
        .collect()
}

fn parse_register_values(values_str: &str) -> Result<Vec<u16>, ParseIntError> {
    values_str.split(',').map(|x| u16::from_str(x.trim())).collect()
}
