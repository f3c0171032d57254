use crate::errors::EngineError;
use crate::expr::{compile, ReturnType, StatefulExpr};
use crate::models::{batch_to_result, Batch, Fields, Tags};
use crate::pipeline::{AlertConfig, EdgeType};
use crate::runtime::edge::{recv_or_stop, Message};
use crate::runtime::node::{Node, NodeCore, SnapshotFn};
use crate::services::SmtpService;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Number of previous levels remembered when computing the flapping
/// percentage.
pub const DEFAULT_FLAP_HISTORY: usize = 21;

/// The newest level change weighs `WEIGHT_DIFF` times more than the
/// oldest.
const WEIGHT_DIFF: f64 = 1.5;

/// Maximum weight applied to the newest level change.
const MAX_WEIGHT: f64 = 1.2;

/// Severity of an alert, ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum AlertLevel {
    #[default]
    NoAlert,
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::NoAlert => write!(f, "noalert"),
            AlertLevel::Info => write!(f, "INFO"),
            AlertLevel::Warning => write!(f, "WARNING"),
            AlertLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Ring of recent levels plus the flapping flag, with the weighted
/// change score driving the hysteresis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlapState {
    pub history: Vec<AlertLevel>,
    pub idx: usize,
    pub flapping: bool,
}

impl FlapState {
    pub fn new(history: usize) -> Self {
        FlapState {
            history: vec![AlertLevel::NoAlert; history],
            idx: 0,
            flapping: false,
        }
    }

    /// Record a level and update the flapping flag against the given
    /// thresholds. Returns the change score for this tick.
    pub fn update(&mut self, level: AlertLevel, low: f64, high: f64) -> f64 {
        self.history[self.idx] = level;
        self.idx = (self.idx + 1) % self.history.len();

        let l = self.history.len();
        let mut changes = 0.0;
        // oldest pair carries weight0, growing by step to MAX_WEIGHT at
        // the newest pair
        let mut weight = MAX_WEIGHT / WEIGHT_DIFF;
        let step = (MAX_WEIGHT - weight) / (l as f64 - 1.0);
        for i in 1..l {
            let c = (i + self.idx) % l;
            let p = if c == 0 { l - 1 } else { c - 1 };
            if self.history[c] != self.history[p] {
                changes += weight;
            }
            weight += step;
        }

        let p = changes / (l as f64 - 1.0);
        if self.flapping && p < low {
            self.flapping = false;
        } else if !self.flapping && p > high {
            self.flapping = true;
        }
        p
    }
}

enum Handler {
    Post(String),
    Email {
        from: String,
        to: Vec<String>,
        subject: String,
    },
}

/// Classifies records into alert levels, dispatches non-zero levels to
/// the configured handlers and optionally suppresses output while the
/// level is flapping.
pub struct AlertNode {
    core: NodeCore,
    use_flapping: bool,
    flap_low: f64,
    flap_high: f64,
    // predicates in ascending severity, taken by the worker at start
    levels: Option<Vec<(AlertLevel, StatefulExpr)>>,
    handlers: Option<Vec<Handler>>,
    flap: Arc<Mutex<FlapState>>,
    smtp: Option<Arc<dyn SmtpService>>,
}

impl AlertNode {
    pub fn new(
        name: String,
        wants: EdgeType,
        config: AlertConfig,
        smtp: Option<Arc<dyn SmtpService>>,
    ) -> Result<Self> {
        let mut handlers = Vec::new();
        if let Some(url) = &config.post {
            handlers.push(Handler::Post(url.clone()));
        }
        if let (Some(from), false) = (&config.from, config.to.is_empty()) {
            handlers.push(Handler::Email {
                from: from.clone(),
                to: config.to.clone(),
                subject: config.subject.clone().unwrap_or_default(),
            });
        }

        let mut levels = Vec::new();
        for (level, predicate) in [
            (AlertLevel::Info, &config.info),
            (AlertLevel::Warning, &config.warn),
            (AlertLevel::Critical, &config.crit),
        ] {
            if let Some(src) = predicate {
                let tree = compile(src, ReturnType::Bool)?;
                levels.push((level, StatefulExpr::new(tree)));
            }
        }

        if config.use_flapping {
            if config.history < 2 {
                return Err(
                    EngineError::Config("alert history count must be >= 2".to_string()).into(),
                );
            }
            if !(0.0..=1.0).contains(&config.flap_low) || !(0.0..=1.0).contains(&config.flap_high)
            {
                return Err(EngineError::Config(
                    "alert flap thresholds are percentages and must be between 0 and 1"
                        .to_string(),
                )
                .into());
            }
        }

        Ok(AlertNode {
            core: NodeCore::new(name, wants, wants),
            use_flapping: config.use_flapping,
            flap_low: config.flap_low,
            flap_high: config.flap_high,
            levels: Some(levels),
            handlers: Some(handlers),
            flap: Arc::new(Mutex::new(FlapState::new(config.history))),
            smtp,
        })
    }
}

/// Evaluate the level predicates in ascending severity. The highest
/// passing level wins; a false predicate or an evaluation error stops
/// the walk and the level accumulated so far is returned.
fn determine_level(
    node: &str,
    levels: &mut [(AlertLevel, StatefulExpr)],
    fields: &Fields,
    tags: &Tags,
) -> AlertLevel {
    let mut level = AlertLevel::NoAlert;
    for (l, predicate) in levels.iter_mut() {
        match predicate.eval_bool(fields, tags) {
            Ok(true) => level = *l,
            Ok(false) => return level,
            Err(e) => {
                error!(node = %node, error = %e, "error evaluating expression");
                return level;
            }
        }
    }
    level
}

async fn dispatch(
    node: &str,
    handlers: &[Handler],
    client: &reqwest::Client,
    smtp: &Option<Arc<dyn SmtpService>>,
    level: AlertLevel,
    batch: &Batch,
) {
    let payload = serde_json::json!({
        "level": level.to_string(),
        "data": batch_to_result(batch),
    });
    for handler in handlers {
        match handler {
            Handler::Post(url) => {
                if let Err(e) = client.post(url.as_str()).json(&payload).send().await {
                    error!(node = %node, error = %e, "failed to POST alert data");
                }
            }
            Handler::Email { from, to, subject } => match smtp {
                Some(smtp) => {
                    if let Err(e) = smtp.send_mail(from, to, subject, &payload.to_string()).await
                    {
                        error!(node = %node, error = %e, "failed to send alert email");
                    }
                }
                None => {
                    warn!(node = %node, "smtp service not enabled, cannot send email");
                }
            },
        }
    }
}

#[async_trait]
impl Node for AlertNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn start(&mut self, snapshot: Option<Vec<u8>>) -> Result<()> {
        if let Some(bytes) = snapshot.filter(|b| !b.is_empty()) {
            let restored: FlapState = serde_json::from_slice(&bytes)?;
            let mut flap = self.flap.lock().expect("flap lock");
            if restored.history.len() == flap.history.len() {
                *flap = restored;
            }
        }
        let (mut ins, outs) = self.core.take_io();
        let mut stop = self.core.stop_rx();
        let mut levels = self
            .levels
            .take()
            .ok_or_else(|| anyhow!("alert node already started"))?;
        let handlers = self.handlers.take().unwrap_or_default();
        let flap = self.flap.clone();
        let (use_flapping, low, high) = (self.use_flapping, self.flap_low, self.flap_high);
        let smtp = self.smtp.clone();
        let wants = self.core.wants();
        let name = self.core.name().to_string();
        self.core.spawn(async move {
            let client = reqwest::Client::new();
            // the alert node emits nothing; outputs close when the
            // worker exits
            let _outs = outs;
            let mut input = ins.pop().ok_or_else(|| anyhow!("alert has no input"))?;
            match wants {
                EdgeType::Stream => {
                    while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                        let p = match msg {
                            Message::Point(p) => p,
                            Message::Batch(_) => continue,
                        };
                        let level = determine_level(&name, &mut levels, &p.fields, &p.tags);
                        if use_flapping {
                            let mut flap = flap.lock().expect("flap lock");
                            flap.update(level, low, high);
                            if flap.flapping {
                                continue;
                            }
                        }
                        if level > AlertLevel::NoAlert {
                            let batch = p.into_batch();
                            dispatch(&name, &handlers, &client, &smtp, level, &batch).await;
                        }
                    }
                }
                EdgeType::Batch => {
                    while let Some(msg) = recv_or_stop(&mut input, &mut stop).await {
                        let b = match msg {
                            Message::Batch(b) => b,
                            Message::Point(_) => continue,
                        };
                        let mut triggered = false;
                        for tf in &b.points {
                            let level = determine_level(&name, &mut levels, &tf.fields, &b.tags);
                            if level > AlertLevel::NoAlert {
                                triggered = true;
                                if use_flapping {
                                    let flapping = {
                                        let mut flap = flap.lock().expect("flap lock");
                                        flap.update(level, low, high);
                                        flap.flapping
                                    };
                                    if flapping {
                                        break;
                                    }
                                }
                                dispatch(&name, &handlers, &client, &smtp, level, &b).await;
                                break;
                            }
                        }
                        if !triggered && use_flapping {
                            flap.lock()
                                .expect("flap lock")
                                .update(AlertLevel::NoAlert, low, high);
                        }
                    }
                }
            }
            Ok(())
        });
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        if !self.use_flapping {
            return Ok(Vec::new());
        }
        Ok(serde_json::to_vec(
            &*self.flap.lock().expect("flap lock"),
        )?)
    }

    fn snapshot_fn(&self) -> SnapshotFn {
        if !self.use_flapping {
            return Arc::new(|| Ok(Vec::new()));
        }
        let flap = self.flap.clone();
        Arc::new(move || Ok(serde_json::to_vec(&*flap.lock().expect("flap lock"))?))
    }
}
