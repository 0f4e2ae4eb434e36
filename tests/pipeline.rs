use async_trait::async_trait;
use reality_scan::engine::{Engine, ProbeRunner};
use reality_scan::geo::GeoReader;
use reality_scan::input;
use reality_scan::model::{Config, ProbeResult, Target, TargetAddress};
use reality_scan::output::CsvSink;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

fn config(port: u16, workers: usize) -> Config {
    Config {
        port,
        workers,
        timeout: Duration::from_millis(1500),
        ipv6: false,
        max_matches: 0,
        stop_on_quota: false,
        ping: false,
        verbose: false,
        output: "out.csv".into(),
        geo_db: None,
        export: None,
    }
}

fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader.records().map(|row| row.unwrap()).collect()
}

#[tokio::test]
async fn non_tls_service_yields_a_handshake_error_record() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(b"SSH-2.0-mock\r\n").await;
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("out.csv");
    let sink = CsvSink::create(&csv_path, None, Some(1)).unwrap();
    let engine = Engine::new(config(port, 1), sink, None);

    let summary = engine
        .run(input::from_list(b"127.0.0.1\n".as_slice()))
        .await
        .unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.feasible, 0);

    let rows = read_rows(&csv_path);
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "127.0.0.1");
    assert!(rows[0][11].starts_with("tls handshake"), "{:?}", &rows[0][11]);
    assert_eq!(&rows[0][9], "false");
}

#[tokio::test]
async fn closed_port_yields_a_tcp_connect_record() {
    // Bind then drop to find a port with nothing listening on it.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("out.csv");
    let sink = CsvSink::create(&csv_path, None, Some(1)).unwrap();
    let engine = Engine::new(config(port, 1), sink, None);

    let summary = engine
        .run(input::from_list(b"127.0.0.1\n".as_slice()))
        .await
        .unwrap();
    assert_eq!(summary.errors, 1);

    let rows = read_rows(&csv_path);
    assert!(rows[0][11].starts_with("tcp connect"), "{:?}", &rows[0][11]);
}

#[tokio::test]
async fn unresolvable_domain_yields_one_dns_failure_record() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("out.csv");
    let sink = CsvSink::create(&csv_path, None, Some(1)).unwrap();
    let engine = Engine::new(config(443, 1), sink, None);

    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        engine.run(input::from_list(
            b"definitely-not-a-real-host-zz.invalid\n".as_slice(),
        )),
    )
    .await
    .expect("dns failure path must terminate")
    .unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.errors, 1);

    let rows = read_rows(&csv_path);
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "");
    assert_eq!(&rows[0][1], "definitely-not-a-real-host-zz.invalid");
    assert!(rows[0][11].starts_with("dns failure"), "{:?}", &rows[0][11]);
}

/// Synthetic prober: every fourth probe starting at the third arrives
/// feasible, mirroring the quota scenario.
struct PatternRunner {
    probes: AtomicUsize,
}

#[async_trait]
impl ProbeRunner for PatternRunner {
    async fn run(&self, target: Target, cfg: &Config, _geo: Option<&GeoReader>) -> Vec<ProbeResult> {
        let position = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        let ip = match &target.address {
            TargetAddress::Ip(ip) => ip.to_string(),
            TargetAddress::Domain(name) => name.clone(),
        };
        let mut result = ProbeResult::skeleton(ip, &target.origin, cfg.port);
        result.geo_code = "UNKNOWN".into();
        result.tls_version = "TLS 1.3".into();
        result.alpn = "h2".into();
        result.curve = "X25519".into();
        result.cert_domain = "mock.example".into();
        result.cert_issuer = "Mock CA".into();
        result.response_time_ms = 1;
        result.feasible = position % 4 == 3;
        vec![result]
    }
}

#[tokio::test]
async fn quota_stops_the_scan_after_the_third_match() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("out.csv");
    let sink = CsvSink::create(&csv_path, None, Some(32)).unwrap();

    let mut cfg = config(443, 1);
    cfg.max_matches = 3;
    cfg.stop_on_quota = true;

    let engine = Engine::with_runner(
        cfg,
        sink,
        None,
        Arc::new(PatternRunner {
            probes: AtomicUsize::new(0),
        }),
    );

    let net = "10.0.0.0/27".parse().unwrap();
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        engine.run(input::from_cidr(net, "10.0.0.0/27".into())),
    )
    .await
    .expect("quota shutdown must terminate the run")
    .unwrap();

    // Matches land at positions 3, 7 and 11; the sink stops on the third.
    assert_eq!(summary.feasible, 3);
    assert_eq!(summary.total, 11);

    let rows = read_rows(&csv_path);
    assert_eq!(rows.len(), 11);
    let feasible_rows = rows.iter().filter(|row| &row[9] == "true").count();
    assert_eq!(feasible_rows, 3);
}

/// Synthetic prober that fans every target out into three results, the way
/// a domain with three resolved addresses would.
struct FanoutRunner;

#[async_trait]
impl ProbeRunner for FanoutRunner {
    async fn run(&self, target: Target, cfg: &Config, _geo: Option<&GeoReader>) -> Vec<ProbeResult> {
        (0..3)
            .map(|index| {
                let mut result =
                    ProbeResult::skeleton(format!("192.0.2.{index}"), &target.origin, cfg.port);
                result.geo_code = "UNKNOWN".into();
                result.error = "tcp connect: refused".into();
                result
            })
            .collect()
    }
}

#[tokio::test]
async fn fanned_out_results_stay_contiguous_per_origin() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("out.csv");
    let sink = CsvSink::create(&csv_path, None, None).unwrap();

    let engine = Engine::with_runner(config(443, 4), sink, None, Arc::new(FanoutRunner));
    let list = b"d0.example\nd1.example\nd2.example\nd3.example\nd4.example\nd5.example\n";
    let summary = engine.run(input::from_list(list.as_slice())).await.unwrap();
    assert_eq!(summary.total, 18);

    // Whatever order the workers finished in, each origin's three rows
    // landed back to back.
    let rows = read_rows(&csv_path);
    for window in rows.chunks(3) {
        assert_eq!(window.len(), 3);
        assert_eq!(&window[0][1], &window[1][1]);
        assert_eq!(&window[1][1], &window[2][1]);
    }
}

#[tokio::test]
async fn multiple_workers_drain_the_whole_stream() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("out.csv");
    let sink = CsvSink::create(&csv_path, None, Some(16)).unwrap();

    let engine = Engine::with_runner(
        config(443, 4),
        sink,
        None,
        Arc::new(PatternRunner {
            probes: AtomicUsize::new(0),
        }),
    );

    let net = "10.0.0.0/28".parse().unwrap();
    let summary = engine
        .run(input::from_cidr(net, "10.0.0.0/28".into()))
        .await
        .unwrap();

    assert_eq!(summary.total, 16);
    assert_eq!(read_rows(&csv_path).len(), 16);
    // Every record kept its origin regardless of which worker probed it.
    assert!(read_rows(&csv_path).iter().all(|row| &row[1] == "10.0.0.0/28"));
}
