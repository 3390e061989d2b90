use std::sync::Arc;

use log::{error, info};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use super::dial::Dialer;
use super::probe_loop::ProbeLoop;
use super::result::ProbeResult;
use super::target::Target;
use crate::metrics::MetricsRegistry;
use crate::output::{MetricFilter, OutputFormatter};

/// The single consumer every probe loop publishes to.
pub struct Reporter {
    filter: MetricFilter,
    formatter: OutputFormatter,
    registry: Option<Arc<MetricsRegistry>>,
}

impl Reporter {
    pub fn new(
        filter: MetricFilter,
        formatter: OutputFormatter,
        registry: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Reporter {
            filter,
            formatter,
            registry,
        }
    }

    pub fn report(&self, result: &ProbeResult) {
        if let Some(registry) = &self.registry {
            registry.update(result);
        }
        let fields = self.filter.apply(result);
        if let Some(rendered) = self.formatter.render(result, &fields) {
            println!("{rendered}");
        }
    }

    /// Drains `rx` until every sender is gone. Returns how many results it saw.
    pub async fn consume(self, mut rx: mpsc::Receiver<ProbeResult>) -> u64 {
        let mut seen = 0;
        while let Some(result) = rx.recv().await {
            self.report(&result);
            seen += 1;
        }
        seen
    }
}

/// Starts one probe loop per target and supervises them until all finish.
pub struct TargetScheduler {
    dialer: Arc<Dialer>,
    targets: Vec<Target>,
}

impl TargetScheduler {
    pub fn new(dialer: Arc<Dialer>, targets: Vec<Target>) -> Self {
        TargetScheduler { dialer, targets }
    }

    /// Runs every loop to completion (count reached or `shutdown` flipped),
    /// then waits for the reporter to drain. Returns the number of results
    /// reported.
    pub async fn run(self, reporter: Reporter, shutdown: watch::Receiver<bool>) -> u64 {
        let (tx, rx) = mpsc::channel(self.targets.len().max(1) * 4);
        let consumer = tokio::spawn(reporter.consume(rx));

        let mut loops = JoinSet::new();
        for target in self.targets {
            info!("Probing {} ({})", target.label, target.scheme);
            let probe = ProbeLoop::new(target, self.dialer.clone());
            loops.spawn(probe.run(tx.clone(), shutdown.clone()));
        }
        drop(tx);

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!("Probe loop panicked: {e}");
            }
        }

        match consumer.await {
            Ok(seen) => seen,
            Err(e) => {
                error!("Reporter task failed: {e}");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::probe_config::ProbeConfig;
    use crate::output::OutputMode;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn quiet_reporter(registry: Option<Arc<MetricsRegistry>>) -> Reporter {
        Reporter::new(
            MetricFilter::new(&[]),
            OutputFormatter::new(OutputMode::Quiet),
            registry,
        )
    }

    #[tokio::test]
    async fn every_target_reports_count_results() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = ProbeConfig {
            count: 2,
            interval: Duration::from_millis(10),
            ..Default::default()
        };
        let dialer = Arc::new(Dialer::new(Arc::new(config)).unwrap());
        let targets = vec![
            Target::parse(&addr.to_string()).unwrap().with_label("a"),
            Target::parse(&addr.to_string()).unwrap().with_label("b"),
        ];
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        let (_stop, shutdown) = watch::channel(false);

        let seen = TargetScheduler::new(dialer, targets)
            .run(quiet_reporter(Some(registry.clone())), shutdown)
            .await;

        assert_eq!(seen, 4);
        assert_eq!(registry.value("a", "TCPConnectError"), Some(0));
        assert_eq!(registry.value("b", "TCPConnectError"), Some(0));
    }

    #[tokio::test]
    async fn shutdown_stops_unlimited_loops() {
        let config = ProbeConfig {
            count: 0,
            interval: Duration::from_secs(60),
            dial_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let dialer = Arc::new(Dialer::new(Arc::new(config)).unwrap());
        let targets = vec![Target::parse("192.0.2.1:81").unwrap()];
        let (stop, shutdown) = watch::channel(false);

        let run = tokio::spawn(TargetScheduler::new(dialer, targets).run(quiet_reporter(None), shutdown));
        tokio::time::sleep(Duration::from_millis(200)).await;
        stop.send(true).unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(seen >= 1);
    }
}
