//! [`Kiosk`] – wires the control logic onto the bus and runs it.
//!
//! Startup order:
//!
//! 1. Announce `starting-up` on the kiosk status topic.
//! 2. Attach the hopper and validator response dispatchers.
//! 3. Wait for the front panel's readiness signal.
//! 4. Announce `started`, show "please wait" and run the first capability
//!    probe.
//! 5. Attach the event router to the payout, validator and hopper event
//!    topics.
//! 6. Start the sweeper that expires unanswered requests.
//!
//! Responses are routed before the panel is ready so that nothing the devices
//! say during startup is lost; events are only routed once the panel can show
//! their effect.

use std::sync::Arc;
use std::time::Duration;

use changeomatic_hal::{Hint, Panel};
use changeomatic_kernel::{CapabilityProbe, CorrelationDispatcher, EventRouter};
use changeomatic_middleware::{EventBus, MessageListener, Publisher, Topic, spawn_listener};
use changeomatic_types::{KioskError, SelfStatusEvent};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::readiness::ReadyWait;

/// Runtime knobs for a [`Kiosk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KioskConfig {
    /// How long a request may stay unanswered before its callback is
    /// dropped.  `None` keeps requests forever.
    pub pending_timeout: Option<Duration>,
    /// How often the sweeper looks for expired requests.
    pub sweep_interval: Duration,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            pending_timeout: Some(Duration::from_secs(30)),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// The change-o-matic control plane.
pub struct Kiosk {
    bus: EventBus,
    publisher: Arc<dyn Publisher>,
    panel: Arc<dyn Panel>,
    hopper: Arc<CorrelationDispatcher>,
    validator: Arc<CorrelationDispatcher>,
    probe: CapabilityProbe,
    router: Arc<EventRouter>,
    config: KioskConfig,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl Kiosk {
    pub fn new(bus: EventBus, panel: Arc<dyn Panel>, config: KioskConfig) -> Self {
        let publisher: Arc<dyn Publisher> = Arc::new(bus.clone());
        let dispatcher = |name: &str| {
            let d = CorrelationDispatcher::new(name);
            Arc::new(match config.pending_timeout {
                Some(ttl) => d.with_retention(ttl),
                None => d,
            })
        };
        let hopper = dispatcher("hopper");
        let validator = dispatcher("validator");

        let probe = CapabilityProbe::new(
            Arc::clone(&hopper),
            Arc::clone(&publisher),
            Arc::clone(&panel),
        );
        let router = Arc::new(EventRouter::new(
            Arc::clone(&publisher),
            Arc::clone(&panel),
            probe.clone(),
        ));

        Self {
            bus,
            publisher,
            panel,
            hopper,
            validator,
            probe,
            router,
            config,
            tasks: Vec::new(),
            started: false,
        }
    }

    /// Bring the kiosk up.  See the module docs for the order of steps.
    ///
    /// # Errors
    ///
    /// [`KioskError::PanelUnavailable`] when the panel drops its readiness
    /// signal; the response listeners are stopped again.
    pub async fn start(&mut self, ready: ReadyWait) -> Result<(), KioskError> {
        if self.started {
            warn!("kiosk already started");
            return Ok(());
        }

        self.announce("starting-up");
        self.attach(Topic::HopperResponse, self.hopper.clone());
        self.attach(Topic::ValidatorResponse, self.validator.clone());

        if let Err(e) = ready.wait().await {
            self.stop_tasks();
            return Err(e);
        }
        self.announce("started");

        self.panel.hint(Hint::PleaseWait);
        self.panel.repaint();
        if let Err(e) = self.probe.trigger() {
            warn!(error = %e, "initial capability probe not sent");
        }

        for topic in [Topic::PayoutEvent, Topic::ValidatorEvent, Topic::HopperEvent] {
            self.attach(topic, self.router.clone());
        }
        if self.config.pending_timeout.is_some() {
            self.spawn_sweeper();
        }

        self.started = true;
        info!("change-o-matic is open for business");
        Ok(())
    }

    /// Announce `shutting-down` and stop every listener.
    pub fn shutdown(&mut self) {
        if self.started {
            self.announce("shutting-down");
        }
        self.stop_tasks();
        self.started = false;
        info!("change-o-matic closed");
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn hopper_dispatcher(&self) -> &Arc<CorrelationDispatcher> {
        &self.hopper
    }

    pub fn validator_dispatcher(&self) -> &Arc<CorrelationDispatcher> {
        &self.validator
    }

    pub fn probe(&self) -> &CapabilityProbe {
        &self.probe
    }

    fn attach(&mut self, topic: Topic, listener: Arc<dyn MessageListener>) {
        debug!(%topic, "attaching listener");
        self.tasks.push(spawn_listener(&self.bus, topic, listener));
    }

    fn spawn_sweeper(&mut self) {
        let dispatchers = [self.hopper.clone(), self.validator.clone()];
        let period = self.config.sweep_interval;
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for dispatcher in &dispatchers {
                    let expired = dispatcher.remove_expired();
                    if expired > 0 {
                        info!(dispatcher = dispatcher.name(), expired, "swept unanswered requests");
                    }
                }
            }
        }));
    }

    fn stop_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Publish a lifecycle event.  Nobody listening is not an error.
    fn announce(&self, event: &str) {
        let status = SelfStatusEvent::new(event);
        let payload = match status.encode() {
            Ok(p) => p,
            Err(e) => {
                warn!(event, error = %e, "could not encode status event");
                return;
            }
        };
        match self.publisher.publish(Topic::KioskStatus, payload) {
            Ok(receivers) => info!(event, receivers, "status announced"),
            Err(e) => debug!(event, error = %e, "status announced to nobody"),
        }
    }
}

impl Drop for Kiosk {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::panel_readiness;
    use changeomatic_hal::sim::{NoteFloat, SimHopper, SimPanel, SimValidator};
    use changeomatic_types::{ALL_CHANNELS_SPEC, DeviceCommand, DeviceMessage};

    async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    struct Rig {
        bus: EventBus,
        hopper: SimHopper,
        validator: SimValidator,
        panel: Arc<SimPanel>,
        kiosk: Kiosk,
    }

    fn rig(float: NoteFloat, config: KioskConfig) -> Rig {
        let bus = EventBus::default();
        let hopper = SimHopper::attach(&bus, float);
        let validator = SimValidator::attach(&bus);
        let panel = Arc::new(SimPanel::new());
        let kiosk = Kiosk::new(bus.clone(), panel.clone() as Arc<dyn Panel>, config);
        Rig {
            bus,
            hopper,
            validator,
            panel,
            kiosk,
        }
    }

    async fn started(float: NoteFloat) -> Result<Rig, KioskError> {
        let mut rig = rig(float, KioskConfig::default());
        let (signal, wait) = panel_readiness();
        signal.ready();
        rig.kiosk.start(wait).await?;
        Ok(rig)
    }

    #[tokio::test]
    async fn startup_probes_and_enables_channels() -> Result<(), Box<dyn std::error::Error>> {
        let rig = started(NoteFloat::default()).await?;

        eventually("channels 1-3 accepting", || rig.validator.accepting() == vec![1, 2, 3]).await;
        assert_eq!(rig.panel.hints().first(), Some(&Hint::PleaseWait));
        assert_eq!(rig.panel.inhibited(1), Some(false));
        assert_eq!(rig.panel.count_hint(Hint::NoCoins), 0);
        eventually("probe cycle complete", || rig.kiosk.probe().cycles_completed() == 1).await;
        Ok(())
    }

    #[tokio::test]
    async fn lifecycle_is_announced() -> Result<(), Box<dyn std::error::Error>> {
        let mut rig = rig(NoteFloat::default(), KioskConfig::default());
        let mut status = rig.bus.subscribe_to(Topic::KioskStatus);
        let (signal, wait) = panel_readiness();
        signal.ready();
        rig.kiosk.start(wait).await?;
        rig.kiosk.shutdown();

        let mut events = Vec::new();
        for _ in 0..3 {
            let payload = tokio::time::timeout(Duration::from_secs(1), status.recv()).await??;
            let message = DeviceMessage::decode(&payload)?;
            assert!(message.message_id.is_some());
            events.push(message.event.unwrap_or_default());
        }
        assert_eq!(events, vec!["starting-up", "started", "shutting-down"]);
        assert!(!rig.kiosk.is_started());
        Ok(())
    }

    #[tokio::test]
    async fn missing_panel_aborts_startup() {
        let mut rig = rig(NoteFloat::default(), KioskConfig::default());
        let (signal, wait) = panel_readiness();
        drop(signal);

        let result = rig.kiosk.start(wait).await;
        assert_eq!(result, Err(KioskError::PanelUnavailable));
        assert!(!rig.kiosk.is_started());
        assert!(rig.hopper.received().is_empty());
        assert!(rig.panel.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_hopper_shows_no_coins() -> Result<(), Box<dyn std::error::Error>> {
        let rig = started(NoteFloat::empty()).await?;

        eventually("no coins hint", || rig.panel.count_hint(Hint::NoCoins) == 1).await;
        assert!(rig.validator.accepting().is_empty());
        let enables = rig
            .validator
            .received()
            .iter()
            .filter(|m| m.device_command() == Some(DeviceCommand::EnableChannels))
            .count();
        assert_eq!(enables, 0);
        Ok(())
    }

    #[tokio::test]
    async fn credited_note_is_paid_out() -> Result<(), Box<dyn std::error::Error>> {
        let rig = started(NoteFloat::default()).await?;
        eventually("channels accepting", || rig.validator.accepting() == vec![1, 2, 3]).await;

        assert!(rig.validator.insert_note(500));

        eventually("payout requested", || {
            rig.hopper
                .received()
                .iter()
                .any(|m| m.device_command() == Some(DeviceCommand::DoPayout) && m.amount == Some(500))
        })
        .await;
        eventually("dispensing shown", || rig.panel.count_hint(Hint::Dispensing) == 1).await;
        assert!(rig.validator.accepting().is_empty());
        assert!(!rig.validator.is_enabled());

        let after_credit: Vec<_> = rig
            .validator
            .received()
            .iter()
            .skip_while(|m| {
                m.device_command() != Some(DeviceCommand::DisableChannels)
                    || m.channel_spec.as_deref() != Some(ALL_CHANNELS_SPEC)
            })
            .filter_map(|m| m.device_command())
            .collect();
        assert_eq!(
            after_credit,
            vec![DeviceCommand::DisableChannels, DeviceCommand::Disable]
        );
        Ok(())
    }

    #[tokio::test]
    async fn floated_hopper_reprobes() -> Result<(), Box<dyn std::error::Error>> {
        let rig = started(NoteFloat::default()).await?;
        eventually("first probe", || rig.kiosk.probe().cycles_completed() == 1).await;

        rig.hopper.set_float(NoteFloat {
            note_10: false,
            ..NoteFloat::default()
        });
        rig.hopper.emit("floated", None);

        eventually("second probe", || rig.kiosk.probe().cycles_completed() == 2).await;
        eventually("channel 2 inhibited", || rig.validator.accepting() == vec![1, 3]).await;
        assert_eq!(rig.panel.inhibited(2), Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn disabled_hopper_is_reenabled() -> Result<(), Box<dyn std::error::Error>> {
        let rig = started(NoteFloat::default()).await?;
        rig.hopper.emit("disabled", None);

        eventually("enable sent", || {
            rig.hopper
                .received()
                .iter()
                .any(|m| m.device_command() == Some(DeviceCommand::Enable))
        })
        .await;
        Ok(())
    }

    #[tokio::test]
    async fn sweeper_expires_unanswered_requests() -> Result<(), Box<dyn std::error::Error>> {
        let config = KioskConfig {
            pending_timeout: Some(Duration::from_millis(20)),
            sweep_interval: Duration::from_millis(10),
        };
        let mut rig = rig(NoteFloat::default(), config);
        let (signal, wait) = panel_readiness();
        signal.ready();
        rig.kiosk.start(wait).await?;

        let never_answered = DeviceMessage::test_all_coin_channels();
        let callback = changeomatic_kernel::RequestCallback::for_request(&never_answered, |_, _| Ok(()))?;
        rig.kiosk.validator_dispatcher().register(callback);
        assert_eq!(rig.kiosk.validator_dispatcher().pending_count(), 1);

        eventually("request expired", || rig.kiosk.validator_dispatcher().pending_count() == 0).await;
        Ok(())
    }
}
