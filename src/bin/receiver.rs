//! Voice Stream Receiver
//!
//! Receives Opus frames over UDP and plays them through the stream player.
//! One datagram carries one frame; an empty datagram ends the stream.
//! JSON control messages arrive on a second port.

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_stream_player::{
    audio::{list_output_devices, CpalOutput, OutputDevice, VirtualOutput},
    codec::OpusDecoder,
    config::{AppConfig, NetworkConfig},
    constants::MAX_DATAGRAM_SIZE,
    control::ControlHandler,
    StreamPlayer,
};

/// Bind a UDP socket with an enlarged receive buffer
fn bind_udp(config: &NetworkConfig, port: u16) -> Result<UdpSocket> {
    let addr: SocketAddr = format!("{}:{}", config.bind_address, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_address, port))?;

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!("Failed to set receive buffer size: {}", e);
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

fn open_output(sample_rate: u32) -> Arc<dyn OutputDevice> {
    let device_name = std::env::var("VOICE_OUTPUT_DEVICE").ok();
    match CpalOutput::open(device_name.as_deref(), sample_rate) {
        Ok(output) => Arc::new(output),
        Err(e) => {
            tracing::warn!("No usable output device ({}), playing into the virtual sink", e);
            Arc::new(VirtualOutput::new(sample_rate))
        }
    }
}

async fn receive_audio(socket: UdpSocket, player: Arc<StreamPlayer>) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, _from) = socket.recv_from(&mut buf).await?;
        player.enqueue_audio_data(buf[..len].to_vec());
    }
}

async fn receive_control(socket: UdpSocket, player: Arc<StreamPlayer>) -> Result<()> {
    let mut handler = ControlHandler::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        let text = match std::str::from_utf8(&buf[..len]) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!("Non-UTF-8 control message from {}", from);
                continue;
            }
        };
        if let Err(e) = handler.handle_text(&player, text) {
            tracing::warn!("Invalid control message from {}: {}", from, e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Voice Stream Receiver");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    // List available output devices
    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let output = open_output(config.playback.sample_rate);
    let player = Arc::new(StreamPlayer::new(
        config.playback.clone(),
        OpusDecoder::factory(config.codec.clone()),
        output,
    ));
    player.start().await.context("Failed to start player")?;

    let audio_socket = bind_udp(&config.network, config.network.audio_port)?;
    let control_socket = bind_udp(&config.network, config.network.control_port)?;
    tracing::info!(
        "Listening for audio on {}:{}, control on {}:{}",
        config.network.bind_address,
        config.network.audio_port,
        config.network.bind_address,
        config.network.control_port
    );

    let audio_task = tokio::spawn(receive_audio(audio_socket, player.clone()));
    let control_task = tokio::spawn(receive_control(control_socket, player.clone()));

    let mut stats_interval =
        tokio::time::interval(Duration::from_secs(config.network.stats_interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = stats_interval.tick() => {
                let stats = player.get_audio_stats();
                tracing::info!(
                    "Playback stats: {} pending decode, {} pending play, state {:?}, buffer {:?}",
                    stats.pending_decode,
                    stats.pending_play,
                    player.state(),
                    stats.health()
                );
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    audio_task.abort();
    control_task.abort();
    player.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use voice_stream_player::codec::{DecoderFactory, FrameDecoder};
    use voice_stream_player::config::PlaybackConfig;

    /// Records the size of every frame it is handed
    struct RecordingDecoder(Arc<Mutex<Vec<usize>>>);

    impl FrameDecoder for RecordingDecoder {
        fn decode(&mut self, frame: &[u8]) -> Vec<i16> {
            self.0.lock().push(frame.len());
            vec![0; 960]
        }

        fn frame_size(&self) -> usize {
            960
        }
    }

    #[tokio::test]
    async fn test_large_datagrams_arrive_whole() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let factory: DecoderFactory = {
            let sizes = sizes.clone();
            Arc::new(move || Ok(Box::new(RecordingDecoder(sizes.clone())) as Box<dyn FrameDecoder>))
        };
        let player = Arc::new(StreamPlayer::new(
            PlaybackConfig::default(),
            factory,
            Arc::new(VirtualOutput::new(16000)),
        ));
        player.start().await.unwrap();

        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();
        let task = tokio::spawn(receive_audio(receiver, player.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..6 {
            sender.send_to(&[7u8; 5000], addr).await.unwrap();
        }

        for _ in 0..100 {
            if sizes.lock().len() == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*sizes.lock(), vec![5000; 6]);

        task.abort();
    }
}
