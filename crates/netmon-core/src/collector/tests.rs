//! Collector tests
//!
//! `process` is driven directly for the state-machine cases; the loopback
//! tests run the real loops on ephemeral ports.

use super::*;
use crate::health::ComponentStatus;
use crate::models::{AlertType, MetricKind, SampleRecord};
use crate::protocol::{
    decode_datagram, Ack, AlertMessage, Datagram, MetricReport, Register, ACK_LEN,
    ACK_WITH_FLOW_LEN, MAX_DATAGRAM_LEN,
};
use crate::test_support::{MemorySink, RejectingSink};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

const T: u64 = 1_700_000_000;

fn peer() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40_000)
}

fn loopback_settings() -> CollectorSettings {
    CollectorSettings {
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        udp_port: 0,
        tcp_port: 0,
        alert_read_timeout: Duration::from_secs(1),
        ..CollectorSettings::default()
    }
}

fn report(agent_id: u16, seq: u16, value: i64) -> MetricReport {
    MetricReport {
        seq,
        agent_id,
        task_id: 12,
        kind: MetricKind::Latency,
        value,
        timestamp: T,
    }
}

async fn ingest_with(sink: Arc<dyn crate::sink::RecordSink>) -> (IngestLoop, HealthRegistry) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let health = HealthRegistry::new();
    health.register(components::SINK).await;
    let ingest = IngestLoop::new(socket, &loopback_settings(), sink, health.clone());
    (ingest, health)
}

fn decode_ack(bytes: &[u8]) -> Ack {
    match decode_datagram(bytes).unwrap().datagram {
        Datagram::Ack(ack) => ack,
        other => panic!("expected ACK, got {:?}", other),
    }
}

mod ingest_tests {
    use super::*;

    #[tokio::test]
    async fn test_register_is_acknowledged() {
        let sink = Arc::new(MemorySink::default());
        let (mut ingest, _) = ingest_with(sink).await;

        let reply = ingest.process(&Register::new(7).encode(), peer()).await.unwrap();
        assert_eq!(reply, vec![3, 0, 0, 0, 7, 0, 10]);
        assert_eq!(reply.len(), ACK_LEN);
    }

    #[tokio::test]
    async fn test_register_with_bad_checksum_still_acknowledged() {
        let sink = Arc::new(MemorySink::default());
        let (mut ingest, _) = ingest_with(sink).await;

        let mut bytes = Register::new(7).encode();
        bytes[6] = bytes[6].wrapping_add(1);

        let reply = ingest.process(&bytes, peer()).await.unwrap();
        assert_eq!(decode_ack(&reply), Ack::plain(0, 7));
    }

    #[tokio::test]
    async fn test_metric_with_bad_checksum_still_forwarded() {
        let sink = Arc::new(MemorySink::default());
        let (mut ingest, _) = ingest_with(sink.clone()).await;

        let mut bytes = report(7, 1, 42).encode().unwrap();
        bytes[6] ^= 0xFF;

        assert!(ingest.process(&bytes, peer()).await.is_some());
        assert_eq!(sink.samples().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_metric_forwarded_once() {
        let sink = Arc::new(MemorySink::default());
        let (mut ingest, _) = ingest_with(sink.clone()).await;
        let bytes = report(7, 1, 42).encode().unwrap();

        let first = ingest.process(&bytes, peer()).await.unwrap();
        assert_eq!(first.len(), ACK_WITH_FLOW_LEN);
        assert_eq!(decode_ack(&first), Ack::with_flow(1, 7, false));

        // Duplicates are dropped silently, no ACK resend
        assert!(ingest.process(&bytes, peer()).await.is_none());

        assert_eq!(
            sink.samples(),
            vec![SampleRecord {
                agent_id: 7,
                task_id: 12,
                metric_kind: MetricKind::Latency,
                value: 42,
                timestamp: T,
            }]
        );
    }

    #[tokio::test]
    async fn test_overload_flag_after_ceiling() {
        let sink = Arc::new(MemorySink::default());
        let (mut ingest, _) = ingest_with(sink).await;

        for seq in 1..=5 {
            let reply = ingest
                .process(&report(7, seq, 10).encode().unwrap(), peer())
                .await
                .unwrap();
            assert!(!decode_ack(&reply).overloaded(), "seq {} flagged early", seq);
        }

        for seq in 6..=8 {
            let reply = ingest
                .process(&report(7, seq, 10).encode().unwrap(), peer())
                .await
                .unwrap();
            assert!(decode_ack(&reply).overloaded(), "seq {} not flagged", seq);
        }
    }

    #[tokio::test]
    async fn test_agents_tracked_independently() {
        let sink = Arc::new(MemorySink::default());
        let (mut ingest, _) = ingest_with(sink.clone()).await;

        for seq in 1..=6 {
            ingest
                .process(&report(1, seq, 10).encode().unwrap(), peer())
                .await;
        }

        // Same sequence number from another agent is not a duplicate
        let reply = ingest
            .process(&report(2, 1, 10).encode().unwrap(), peer())
            .await
            .unwrap();
        assert!(!decode_ack(&reply).overloaded());
        assert_eq!(ingest.state().agent_count(), 2);
        assert_eq!(ingest.state().window_len(1), 6);
        assert_eq!(sink.samples().len(), 7);
    }

    #[tokio::test]
    async fn test_bad_datagrams_dropped_and_loop_continues() {
        let sink = Arc::new(MemorySink::default());
        let (mut ingest, _) = ingest_with(sink.clone()).await;

        let metric = report(7, 1, 42).encode().unwrap();
        assert!(ingest.process(&metric[..20], peer()).await.is_none());
        assert!(ingest.process(&[], peer()).await.is_none());
        assert!(ingest.process(&[42, 1, 2, 3], peer()).await.is_none());
        assert!(ingest
            .process(&Ack::with_flow(1, 7, false).encode(), peer())
            .await
            .is_none());
        assert!(sink.samples().is_empty());

        // A truncated packet must not poison the dedup window
        assert!(ingest.process(&metric, peer()).await.is_some());
        assert_eq!(sink.samples().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_still_acknowledges_and_degrades_health() {
        let (mut ingest, health) = ingest_with(Arc::new(RejectingSink)).await;

        let reply = ingest
            .process(&report(7, 1, 42).encode().unwrap(), peer())
            .await;
        assert!(reply.is_some());
        assert_eq!(
            health.status_of(components::SINK).await,
            Some(ComponentStatus::Degraded)
        );

        // Still deduplicated even though the sink refused it
        assert!(ingest
            .process(&report(7, 1, 42).encode().unwrap(), peer())
            .await
            .is_none());
    }

    #[test]
    fn test_ingest_state_admission() {
        let now = tokio::time::Instant::now();
        let mut state = IngestState::new(2, 1, CongestionPolicy::Sticky);

        assert_eq!(state.admit(9, 1, now), Admission::Accepted { overloaded: false });
        assert_eq!(state.admit(9, 1, now), Admission::Duplicate);
        assert_eq!(state.admit(9, 2, now), Admission::Accepted { overloaded: true });
        // Window of two evicted seq 1
        assert_eq!(state.admit(9, 3, now), Admission::Accepted { overloaded: true });
        assert_eq!(state.admit(9, 1, now), Admission::Accepted { overloaded: true });
        assert_eq!(state.window_len(9), 2);
    }
}

mod loopback_tests {
    use super::*;

    async fn start(sink: Arc<MemorySink>) -> (SocketAddr, SocketAddr, broadcast::Sender<()>, CollectorTasks) {
        let collector = Collector::bind(loopback_settings(), sink, HealthRegistry::new())
            .await
            .unwrap();
        let udp = collector.udp_addr().unwrap();
        let tcp = collector.tcp_addr().unwrap();
        let (shutdown, _) = broadcast::channel(1);
        let tasks = collector.spawn(&shutdown);
        (udp, tcp, shutdown, tasks)
    }

    async fn exchange(socket: &UdpSocket, bytes: &[u8]) -> Option<Vec<u8>> {
        socket.send(bytes).await.unwrap();
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        match tokio::time::timeout(Duration::from_millis(300), socket.recv(&mut buf)).await {
            Ok(Ok(len)) => Some(buf[..len].to_vec()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_register_metric_duplicate_scenario() {
        let sink = Arc::new(MemorySink::default());
        let (udp, _tcp, shutdown, tasks) = start(sink.clone()).await;

        let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        agent.connect(udp).await.unwrap();

        let ack = exchange(&agent, &Register::new(7).encode()).await.unwrap();
        assert_eq!(ack, vec![3, 0, 0, 0, 7, 0, 10]);

        let metric = report(7, 1, 42).encode().unwrap();
        let ack = exchange(&agent, &metric).await.unwrap();
        assert_eq!(decode_ack(&ack), Ack::with_flow(1, 7, false));

        assert!(exchange(&agent, &metric).await.is_none());

        let samples = sink.wait_for_samples(1, Duration::from_secs(1)).await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0], report(7, 1, 42).to_record());

        shutdown.send(()).unwrap();
        tasks.join().await;
    }

    #[tokio::test]
    async fn test_alert_delivered_over_stream() {
        let sink = Arc::new(MemorySink::default());
        let (_udp, tcp, shutdown, tasks) = start(sink.clone()).await;

        let alert = AlertMessage::threshold_exceeded(7, MetricKind::Latency, 75, 50, T);
        let mut stream = TcpStream::connect(tcp).await.unwrap();
        stream.write_all(&alert.encode().unwrap()).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        let alerts = sink.wait_for_alerts(1, Duration::from_secs(2)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::ThresholdExceeded);
        assert_eq!(alerts[0].value, 75);
        assert_eq!(alerts[0].threshold, 50);

        shutdown.send(()).unwrap();
        tasks.join().await;
    }

    #[tokio::test]
    async fn test_short_alert_discarded() {
        let sink = Arc::new(MemorySink::default());
        let (_udp, tcp, shutdown, tasks) = start(sink.clone()).await;

        let bytes = AlertMessage::threshold_exceeded(7, MetricKind::Latency, 75, 50, T)
            .encode()
            .unwrap();
        let mut stream = TcpStream::connect(tcp).await.unwrap();
        stream.write_all(&bytes[..12]).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        // A well-formed alert on a later connection still gets through
        let mut stream = TcpStream::connect(tcp).await.unwrap();
        stream.write_all(&bytes).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        let alerts = sink.wait_for_alerts(1, Duration::from_secs(2)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(sink.alerts().len(), 1);

        shutdown.send(()).unwrap();
        tasks.join().await;
    }
}
