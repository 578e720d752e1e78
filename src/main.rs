use anyhow::{bail, Context};
use jamaudio::audio::{self, AlsaAudioDriver, AudioConfig, AudioSystem, DeviceReport};
use jamaudio::config::Config;
use jamaudio::{player, recorder};
use tokio::io::AsyncRead;
use tokio::signal;

const USAGE: &str = "usage: jamaudio <play <file|->|record <file>|devices>";

enum Command {
    Play(String),
    Record(String),
    Devices,
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    match args {
        [cmd, path] if cmd == "play" => Ok(Command::Play(path.clone())),
        [cmd, path] if cmd == "record" => Ok(Command::Record(path.clone())),
        [cmd] if cmd == "devices" => Ok(Command::Devices),
        _ => bail!("invalid arguments: {:?}", args),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().unwrap_or_default();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let mut audio_config = AudioConfig::from(&config);
    println!("{} v{}", config.app_name, config.app_version);

    match command {
        Command::Devices => {
            // 只查询设备能力，不启动音频线程
            let driver = AlsaAudioDriver::new(audio_config);
            println!("{}", DeviceReport::collect(&driver).to_json()?);
        }

        Command::Play(path) => {
            audio_config.playback_enabled = true;
            audio_config.capture_enabled = false;

            let mut system = AudioSystem::start(audio_config.clone())?;
            if system.is_using_null_driver() {
                bail!("no audio device available");
            }
            let mut tx = system
                .playback_tx()
                .context("playback handoff unavailable")?;
            let mut decoder = audio::create_decoder(&audio_config)?;
            let device_rate = system.driver().sample_rate();

            // "-" 表示从标准输入读取
            let reader: Box<dyn AsyncRead + Unpin> = if path == "-" {
                Box::new(tokio::io::stdin())
            } else {
                Box::new(
                    tokio::fs::File::open(&path)
                        .await
                        .with_context(|| format!("Failed to open {}", path))?,
                )
            };

            tokio::select! {
                // 监听 Ctrl+C 信号
                _ = signal::ctrl_c() => {
                    println!("Received Ctrl+C, shutting down...");
                    system.stop(false);
                }
                result = player::play_stream(reader, decoder.as_mut(), &mut tx, config.read_chunk_size, device_rate) => {
                    let stats = result?;
                    println!(
                        "Played {} frames from {} bytes ({} malformed chunks)",
                        stats.frames_sent, stats.bytes_read, stats.malformed
                    );
                    // 播放完毕，排空设备缓冲区
                    system.stop(true);
                }
            }
        }

        Command::Record(path) => {
            audio_config.playback_enabled = false;
            audio_config.capture_enabled = true;

            let mut system = AudioSystem::start(audio_config)?;
            if system.is_using_null_driver() {
                bail!("no audio device available");
            }
            let mut rx = system.capture_rx().context("capture handoff unavailable")?;
            let device_rate = system.driver().sample_rate();
            let sink = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("Failed to create {}", path))?;

            println!("Recording to {}, press Ctrl+C to stop", path);
            let stats = recorder::record_stream(&mut rx, sink, async {
                let _ = signal::ctrl_c().await;
                println!("Received Ctrl+C, shutting down...");
            })
            .await?;
            system.stop(false);
            println!(
                "Recorded {} frames ({} ch, {} Hz) to {}",
                stats.frames,
                stats.channels,
                device_rate,
                path
            );
        }
    }

    Ok(())
}
