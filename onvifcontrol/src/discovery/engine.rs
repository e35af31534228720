//! Moteur de probe WS-Discovery.
//!
//! Une session par appel à [`DiscoveryEngine::start_probe`] : socket UDP
//! éphémère, file d'envois séquentielle auto-cadencée (pas de rafale sur le
//! segment réseau), écoute jusqu'au timeout global quel que soit l'état de la
//! file. Les sessions sont indépendantes et peuvent s'entrelacer librement ;
//! le registre des sessions actives est la seule ressource partagée.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::errors::ControlPointError;
use crate::events::{ControlPointEvent, EventBus};
use crate::model::DeviceMatch;

use super::{
    DEFAULT_DEVICE_TYPES, DISCOVERY_RETRIES_MAX, DISCOVERY_RETRY_INTERVAL_MS,
    DISCOVERY_TIMEOUT_MS, WS_DISCOVERY_MULTICAST_ADDR, WS_DISCOVERY_PORT,
    build_probe_message, parse_probe_matches,
};

/// Paramètres d'une session de découverte.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub max_retries: u32,

    /// Destination des probes. Multicast WS-Discovery par défaut ;
    /// remplaçable par un répondeur local pour les tests.
    pub probe_target: SocketAddr,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let probe_target = format!("{}:{}", WS_DISCOVERY_MULTICAST_ADDR, WS_DISCOVERY_PORT)
            .parse()
            .expect("WS-Discovery multicast address is well-formed");
        Self {
            timeout_ms: DISCOVERY_TIMEOUT_MS,
            retry_interval_ms: DISCOVERY_RETRY_INTERVAL_MS,
            max_retries: DISCOVERY_RETRIES_MAX,
            probe_target,
        }
    }
}

/// Moteur de découverte : registre de sessions + configuration.
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    // Seules mutations : insert par start_probe, remove par le teardown de la
    // session ou stop_all_probes - toujours sous ce mutex
    sessions: Arc<Mutex<HashMap<Uuid, oneshot::Sender<()>>>>,
    bus: EventBus,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryEngine {
    pub fn new() -> Self {
        Self::with_config(DiscoveryConfig::default())
    }

    pub fn with_config(config: DiscoveryConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            bus: EventBus::new(),
        }
    }

    /// Abonne un receiver aux événements de découverte.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<ControlPointEvent> {
        self.bus.subscribe()
    }

    /// Nombre de sessions de probe actuellement actives.
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().expect("session registry mutex poisoned").len()
    }

    /// Lance une session de probe et résout avec les devices découverts
    /// quand le timeout global expire.
    ///
    /// Si le bind échoue, l'appel échoue immédiatement : aucun timer armé,
    /// aucune session enregistrée.
    pub async fn start_probe(
        &self,
        device_types: Option<&[&str]>,
    ) -> Result<Vec<DeviceMatch>, ControlPointError> {
        let types = device_types.unwrap_or(DEFAULT_DEVICE_TYPES);

        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(ControlPointError::Bind)?;

        let session_id = Uuid::new_v4();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        self.sessions
            .lock()
            .expect("session registry mutex poisoned")
            .insert(session_id, stop_tx);
        // Le guard désenregistre la session à la sortie, même si le future
        // est abandonné avant le timeout
        let _session = SessionGuard {
            sessions: Arc::clone(&self.sessions),
            id: session_id,
        };
        debug!(
            "🔍 probe session {} started ({} device types, target {})",
            session_id,
            types.len(),
            self.config.probe_target
        );

        // Un message par type, le jeu complet répété contre la perte multicast
        let messages: Vec<String> = types
            .iter()
            .map(|t| build_probe_message(t, Uuid::new_v4()))
            .collect();
        let mut queue: VecDeque<String> = (0..self.config.max_retries)
            .flat_map(|_| messages.iter().cloned())
            .collect();

        let mut matches: Vec<DeviceMatch> = Vec::new();
        let mut seen_urns: HashSet<String> = HashSet::new();
        let mut buf = vec![0u8; 8192];

        let deadline = sleep(Duration::from_millis(self.config.timeout_ms));
        tokio::pin!(deadline);

        // Drain séquentiel auto-cadencé : le tick suivant n'est programmé
        // qu'après l'envoi courant
        let mut send_timer = interval(Duration::from_millis(self.config.retry_interval_ms));
        send_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    debug!("probe session {} timeout, {} devices", session_id, matches.len());
                    break;
                }
                _ = &mut stop_rx => {
                    debug!("probe session {} stopped", session_id);
                    break;
                }
                _ = send_timer.tick(), if !queue.is_empty() => {
                    if let Some(message) = queue.pop_front() {
                        if let Err(e) = socket.send_to(message.as_bytes(), self.config.probe_target).await {
                            // Best effort : un segment sans route multicast ne
                            // doit pas faire échouer la session
                            warn!("probe send to {} failed: {}", self.config.probe_target, e);
                        }
                    }
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((n, from)) => {
                            let datagram = String::from_utf8_lossy(&buf[..n]);
                            self.collect_matches(session_id, &datagram, from, &mut seen_urns, &mut matches);
                        }
                        Err(e) => {
                            warn!("probe session {} recv error: {}", session_id, e);
                        }
                    }
                }
            }
        }

        // Teardown : socket fermée au drop, session retirée par le guard.
        // Le chemin d'arrêt et le timeout convergent ici, le remove est
        // idempotent face à stop_all_probes.
        self.bus.emit(ControlPointEvent::ProbeCompleted {
            session_id,
            devices: matches.len(),
        });
        info!("✅ probe session {} done: {} device(s)", session_id, matches.len());

        Ok(matches)
    }

    /// Arrête toutes les sessions actives.
    ///
    /// Les erreurs de teardown individuelles sont avalées : une session
    /// défaillante ne bloque pas le nettoyage des autres.
    pub async fn stop_all_probes(&self) {
        let stopped: Vec<(Uuid, oneshot::Sender<()>)> = {
            let mut sessions = self.sessions.lock().expect("session registry mutex poisoned");
            sessions.drain().collect()
        };
        for (id, tx) in stopped {
            if tx.send(()).is_err() {
                trace!("probe session {} already finished", id);
            }
        }
    }

    fn collect_matches(
        &self,
        session_id: Uuid,
        datagram: &str,
        from: SocketAddr,
        seen_urns: &mut HashSet<String>,
        matches: &mut Vec<DeviceMatch>,
    ) {
        for device in parse_probe_matches(datagram) {
            // First-writer-wins : la première réponse pour un URN gagne
            if !seen_urns.insert(device.urn.clone()) {
                trace!("duplicate ProbeMatch for {} from {}", device.urn, from);
                continue;
            }
            debug!(
                "📡 device {} '{}' at {:?} (from {})",
                device.urn, device.name, device.xaddrs, from
            );
            self.bus.emit(ControlPointEvent::DeviceDiscovered {
                session_id,
                urn: device.urn.clone(),
                name: device.name.clone(),
                xaddrs: device.xaddrs.clone(),
            });
            matches.push(device);
        }
    }
}

/// Retire une session du registre quand `start_probe` rend la main, quelle
/// que soit la façon dont son future se termine (timeout, stop, abandon).
struct SessionGuard {
    sessions: Arc<Mutex<HashMap<Uuid, oneshot::Sender<()>>>>,
    id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn test_config(target: SocketAddr, timeout_ms: u64) -> DiscoveryConfig {
        DiscoveryConfig {
            timeout_ms,
            retry_interval_ms: 30,
            max_retries: 2,
            probe_target: target,
        }
    }

    async fn silent_target() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    fn probe_match_datagram(urn: &str, xaddr: &str) -> String {
        format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
    xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing"
    xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery">
  <s:Body><d:ProbeMatches><d:ProbeMatch>
    <wsa:EndpointReference><wsa:Address>{}</wsa:Address></wsa:EndpointReference>
    <d:Scopes>onvif://www.onvif.org/name/Cam</d:Scopes>
    <d:XAddrs>{}</d:XAddrs>
  </d:ProbeMatch></d:ProbeMatches></s:Body>
</s:Envelope>"#,
            urn, xaddr
        )
    }

    #[tokio::test]
    async fn test_probe_resolves_on_timeout_without_replies() {
        let (_target, addr) = silent_target().await;
        let engine = DiscoveryEngine::with_config(test_config(addr, 300));

        let started = Instant::now();
        let devices = engine.start_probe(None).await.unwrap();
        let elapsed = started.elapsed();

        assert!(devices.is_empty());
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(1500), "timeout bounds the call");
        assert_eq!(engine.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_probe_dedups_replies_by_urn() {
        let (target, addr) = silent_target().await;
        let engine = DiscoveryEngine::with_config(test_config(addr, 400));

        // Répondeur local : trois datagrammes dont un doublon d'URN
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let (_, from) = target.recv_from(&mut buf).await.unwrap();
            for datagram in [
                probe_match_datagram("urn:uuid:aaa", "http://10.0.0.1/onvif/device_service"),
                probe_match_datagram("urn:uuid:aaa", "http://10.9.9.9/onvif/device_service"),
                probe_match_datagram("urn:uuid:bbb", "http://10.0.0.2/onvif/device_service"),
            ] {
                target.send_to(datagram.as_bytes(), from).await.unwrap();
            }
        });

        let devices = engine.start_probe(Some(&["NetworkVideoTransmitter"])).await.unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].urn, "urn:uuid:aaa");
        // First-writer-wins : la xaddr du premier datagramme est conservée
        assert_eq!(devices[0].xaddrs[0], "http://10.0.0.1/onvif/device_service");
        assert_eq!(devices[1].urn, "urn:uuid:bbb");
    }

    #[tokio::test]
    async fn test_discovery_event_emitted_per_device() {
        let (target, addr) = silent_target().await;
        let engine = DiscoveryEngine::with_config(test_config(addr, 400));
        let events = engine.subscribe();

        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let (_, from) = target.recv_from(&mut buf).await.unwrap();
            let datagram = probe_match_datagram("urn:uuid:ccc", "http://10.0.0.3/onvif/device_service");
            target.send_to(datagram.as_bytes(), from).await.unwrap();
        });

        engine.start_probe(None).await.unwrap();

        let mut discovered = 0;
        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                ControlPointEvent::DeviceDiscovered { urn, .. } => {
                    assert_eq!(urn, "urn:uuid:ccc");
                    discovered += 1;
                }
                ControlPointEvent::ProbeCompleted { devices, .. } => {
                    assert_eq!(devices, 1);
                    completed += 1;
                }
                _ => {}
            }
        }
        assert_eq!(discovered, 1);
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn test_stop_all_probes_tears_down_sessions() {
        let (_target, addr) = silent_target().await;
        let engine = Arc::new(DiscoveryEngine::with_config(test_config(addr, 10_000)));

        let handle = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start_probe(None).await })
        };

        // Laisse la session s'enregistrer
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.active_sessions(), 1);

        engine.stop_all_probes().await;

        let devices = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("session must finish promptly after stop")
            .unwrap()
            .unwrap();
        assert!(devices.is_empty());
        assert_eq!(engine.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_aborted_session_is_deregistered() {
        let (_target, addr) = silent_target().await;
        let engine = Arc::new(DiscoveryEngine::with_config(test_config(addr, 10_000)));

        let handle = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start_probe(None).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.active_sessions(), 1);

        // Abandon du future en vol : le guard doit nettoyer le registre
        handle.abort();
        let _ = handle.await;
        assert_eq!(engine.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let (_target, addr) = silent_target().await;
        let engine = Arc::new(DiscoveryEngine::with_config(test_config(addr, 300)));

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start_probe(None).await })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.start_probe(Some(&["Device"])).await })
        };

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
        assert_eq!(engine.active_sessions(), 0);
    }
}
