mod config;
mod console;
mod events;
mod host;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use config::HostConfig;
use events::HostEvent;
use host::Host;
use qnet::{NetConfig, PacketLossSimulation};

#[derive(Parser)]
#[command(name = "qnet")]
#[command(about = "Reliable datagram host")]
struct Args {
    #[arg(short, long, default_value_t = qnet::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Accept connections")]
    listen: bool,

    #[arg(long, help = "Run without a local client slot")]
    dedicated: bool,

    #[arg(short, long, default_value_t = 8)]
    maxplayers: usize,

    #[arg(long, default_value = "UNNAMED")]
    hostname: String,

    #[arg(long, help = "Local address to advertise instead of the detected one")]
    ip: Option<IpAddr>,

    #[arg(long, help = "Disable the UDP driver")]
    nolan: bool,

    #[arg(long, help = "Level name; an active level freezes maxplayers")]
    map: Option<String>,

    #[arg(short, long, help = "Server to join at startup")]
    connect: Option<String>,

    #[arg(long, help = "Record network traffic to a file")]
    record: Option<PathBuf>,

    #[arg(long, help = "Replay network traffic from a file")]
    playback: Option<PathBuf>,

    #[arg(long, default_value_t = 300.0, help = "Seconds before an idle connection is closed")]
    timeout: f64,

    #[arg(long, default_value_t = 72)]
    frame_rate: u32,

    #[arg(long, help = "Enable outgoing packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,
}

impl Args {
    fn into_config(self) -> HostConfig {
        let packet_loss = self
            .simulate_packet_loss
            .then(|| PacketLossSimulation::new(self.loss_percent));
        let net = NetConfig {
            host_port: self.port,
            listen: self.listen,
            dedicated: self.dedicated,
            max_clients: self.maxplayers,
            message_timeout: self.timeout,
            host_name: self.hostname,
            local_ip: self.ip,
            no_lan: self.nolan,
            record: self.record,
            playback: self.playback,
            packet_loss,
            ..Default::default()
        };
        HostConfig {
            net,
            frame_rate: self.frame_rate,
            map: self.map,
            connect: self.connect,
            ..Default::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = Args::parse().into_config();

    let mut host = Host::new(config).context("network initialization failed")?;
    let (sender, commands) = mpsc::channel();
    console::spawn_stdin(sender);

    let net = host.net();
    log::info!(
        "{} ready on port {} (listen {})",
        net.server_status().host_name,
        net.host_port(),
        u8::from(net.is_listening())
    );
    host.start();
    run(&mut host, &commands);
    log::info!("Shutting down...");
    host.shutdown();
    Ok(())
}

fn run(host: &mut Host, commands: &Receiver<String>) {
    let running = host.running();
    let mut console_open = true;

    while running.load(Ordering::SeqCst) {
        while console_open {
            match commands.try_recv() {
                Ok(line) => host.execute_line(&line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => console_open = false,
            }
        }

        host.frame();
        for event in host.drain_events() {
            log_event(event);
        }
        thread::sleep(host.frame_duration());
    }
}

fn log_event(event: HostEvent) {
    match event {
        HostEvent::ClientConnected { id, address } => {
            log::info!("Client {} connected from {}", id.index(), address);
        }
        HostEvent::ClientDisconnected {
            id,
            address,
            reason,
        } => {
            log::info!("Client {} ({}) {}", id.index(), address, reason.as_str());
        }
        HostEvent::ServerDisconnected { address, reason } => {
            log::info!("Server {} {}", address, reason.as_str());
        }
        HostEvent::Chat { from, text } => log::info!("{}: {}", from, text),
        HostEvent::ServerPrint { text } => log::info!("{}", text),
        HostEvent::Error { message } => log::error!("{}", message),
    }
}
