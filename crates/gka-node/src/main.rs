mod common;
mod events;
mod output;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use gka_metrics::{Aggregate, StatisticsRecorder};
use gka_protocol::{
    DistributedMember, MemberConfig, MemberRuntime, ProtocolVariant, RuntimeChannels,
    ScatterDelay, StrMember,
};
use gka_transport::{ChannelConfig, MulticastChannel};

use common::{elapsed_s, parse_is_sponsor};
use events::{emit, now_iso, EventProtocol, EventStarted, EventStatistics};

#[derive(Parser, Debug)]
#[command(
    name = "gka-node",
    version,
    about = "One member of a group key agreement over IP multicast"
)]
struct Cli {
    /// Start as the initial sponsor (true|false, any case).
    #[arg(value_parser = parse_is_sponsor, action = clap::ArgAction::Set)]
    is_sponsor: bool,

    /// Service the group agrees on a key for.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    service_id: u32,

    /// Expected number of members, including this one.
    #[arg(value_parser = clap::value_parser!(u16).range(2..))]
    member_count: u16,

    /// Lower bound of the retransmission scatter delay, in ms.
    scatter_delay_min_ms: u64,

    /// Upper bound of the retransmission scatter delay, in ms.
    scatter_delay_max_ms: u64,

    /// Interface to listen on.
    #[arg(requires_all = ["multicast_ip", "multicast_port"])]
    listen_interface_ip: Option<Ipv4Addr>,

    /// Multicast group address.
    multicast_ip: Option<Ipv4Addr>,

    /// Multicast group port.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    multicast_port: Option<u16>,

    /// Key agreement variant.
    #[arg(long, default_value_t = ProtocolVariant::Chained)]
    variant: ProtocolVariant,

    /// How long the finishing member waits for FINISH_ACKs, in ms.
    #[arg(long, default_value = "5000")]
    finish_timeout_ms: u64,

    /// Where statistics CSV files are written.
    #[arg(long, default_value = "statistic_results")]
    output_dir: PathBuf,
}

impl Cli {
    fn channel_config(&self) -> ChannelConfig {
        let mut config = ChannelConfig::new();
        if let Some(ip) = self.listen_interface_ip {
            config = config.listen_interface(ip);
        }
        if let Some(ip) = self.multicast_ip {
            config = config.multicast_addr(ip);
        }
        if let Some(port) = self.multicast_port {
            config = config.multicast_port(port);
        }
        config
    }

    fn member_config(&self) -> MemberConfig {
        MemberConfig::new(self.service_id, self.member_count)
            .sponsor(self.is_sponsor)
            .scatter_delay(ScatterDelay::from_millis(
                self.scatter_delay_min_ms,
                self.scatter_delay_max_ms,
            ))
            .finish_timeout(Duration::from_millis(self.finish_timeout_ms))
            .variant(self.variant)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    let channel = MulticastChannel::bind(cli.channel_config())
        .await
        .context("failed to open the multicast channel")?;
    let local = channel.local_endpoint();
    let stats = Arc::new(StatisticsRecorder::new());
    let config = cli.member_config();

    tracing::info!(
        %local,
        group = %channel.group(),
        variant = %cli.variant,
        sponsor = cli.is_sponsor,
        "gka-node v{}",
        env!("CARGO_PKG_VERSION")
    );
    emit(&EventStarted {
        event: "started",
        endpoint: local.to_string(),
        variant: cli.variant.to_string(),
        is_sponsor: cli.is_sponsor,
        service_id: cli.service_id,
        member_count: cli.member_count,
        timestamp: now_iso(),
    });

    let RuntimeChannels { handle, mut events } = match cli.variant {
        ProtocolVariant::Chained => {
            let member = StrMember::new(config, local, stats.clone())?;
            MemberRuntime::spawn(member, channel)
        }
        ProtocolVariant::Distributed => {
            let member = DistributedMember::new(config, local, stats.clone())?;
            MemberRuntime::spawn(member, channel)
        }
    };

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => emit(&EventProtocol::new(&event, elapsed_s(start))),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                tracing::warn!("interrupted, stopping before the agreement finished");
                interrupted = true;
                handle.shutdown().await;
            }
        }
    }

    // Per-process aggregate: this member's snapshot only.
    let snapshot = stats.snapshot();
    let mut aggregate = Aggregate::new(cli.member_count);
    aggregate.absorb(&snapshot);
    let csv = output::write_statistics(&cli.output_dir, &aggregate)
        .with_context(|| format!("failed to write statistics to {}", cli.output_dir.display()))?;
    tracing::info!(path = %csv.display(), "statistics written");
    emit(&EventStatistics {
        event: "statistics",
        csv: csv.display().to_string(),
        statistics: &snapshot,
        elapsed_s: elapsed_s(start),
    });

    if interrupted {
        anyhow::bail!("interrupted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_arguments() {
        let cli = Cli::try_parse_from(["gka-node", "TRUE", "3", "4", "200", "10"]).unwrap();
        assert!(cli.is_sponsor);
        assert_eq!(cli.service_id, 3);
        assert_eq!(cli.member_count, 4);
        assert_eq!(cli.variant, ProtocolVariant::Chained);
        assert_eq!(cli.output_dir, PathBuf::from("statistic_results"));

        let config = cli.member_config();
        assert!(config.is_sponsor());
        // Reversed bounds are swapped.
        assert_eq!(config.get_scatter_delay().min(), Duration::from_millis(10));
        assert_eq!(config.get_finish_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn parses_network_overrides_and_flags() {
        let cli = Cli::try_parse_from([
            "gka-node",
            "false",
            "1",
            "2",
            "10",
            "50",
            "127.0.0.1",
            "239.1.2.3",
            "6000",
            "--variant",
            "distributed",
            "--finish-timeout-ms",
            "750",
        ])
        .unwrap();
        let channel = cli.channel_config();
        assert_eq!(
            channel.multicast_group(),
            "239.1.2.3:6000".parse().unwrap()
        );
        assert_eq!(cli.variant, ProtocolVariant::Distributed);
        assert_eq!(
            cli.member_config().get_finish_timeout(),
            Duration::from_millis(750)
        );
    }

    #[test]
    fn rejects_invalid_arguments() {
        for args in [
            vec!["gka-node", "maybe", "1", "2", "10", "20"],
            vec!["gka-node", "true", "0", "2", "10", "20"],
            vec!["gka-node", "true", "1", "1", "10", "20"],
            vec!["gka-node", "true", "1", "2", "10"],
            vec!["gka-node", "true", "1", "2", "10", "20", "127.0.0.1"],
        ] {
            assert!(Cli::try_parse_from(args.clone()).is_err(), "accepted {args:?}");
        }
    }
}
