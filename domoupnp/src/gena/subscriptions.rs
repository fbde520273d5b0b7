//! Table des souscriptions d'un service hébergé.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use url::Url;
use uuid::Uuid;

use crate::errors::UpnpError;
use crate::http::message::Headers;

use super::{clamp_timeout, parse_callback, EventKey, GenaTimeout, NT_EVENT, TIMEOUT_DEFAULT};

/// En-têtes pertinents d'un SUBSCRIBE, extraits de la requête HTTP.
#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub sid: Option<String>,
    pub nt: Option<String>,
    pub callback: Option<String>,
    pub timeout: Option<GenaTimeout>,
    /// Filtre UDA 1.1 `STATEVAR` : souscription à un sous-ensemble.
    pub statevars: Option<Vec<String>>,
}

impl SubscribeRequest {
    pub fn from_headers(headers: &Headers) -> Result<Self, UpnpError> {
        let timeout = match headers.get("TIMEOUT") {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };
        let statevars = headers.get("STATEVAR").map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });
        Ok(Self {
            sid: headers.get("SID").map(str::to_string),
            nt: headers.get("NT").map(str::to_string),
            callback: headers.get("CALLBACK").map(str::to_string),
            timeout,
            statevars,
        })
    }
}

/// Réponse d'un SUBSCRIBE/renouvellement accepté.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAck {
    pub sid: String,
    pub timeout_secs: u32,
}

/// Notification en attente de livraison pour une souscription.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub seq: u32,
    pub body: String,
    /// L'événement initial ne part que vers la première URL CALLBACK.
    pub first_callback_only: bool,
}

/// Une souscription côté host.
#[derive(Debug)]
pub struct Subscription {
    pub sid: String,
    pub callbacks: Vec<Url>,
    pub timeout_secs: u32,
    pub expires_at: Instant,
    pub statevars: Option<Vec<String>>,
    key: EventKey,
    pub queue: VecDeque<PendingEvent>,
    /// Une livraison est en cours : la file attend (FIFO strict par SID).
    pub in_flight: bool,
}

impl Subscription {
    fn applies_to(&self, variable: &str) -> bool {
        match &self.statevars {
            None => true,
            Some(filter) => filter.iter().any(|v| v == variable),
        }
    }

    /// Empile un événement portant les changements donnés.
    fn push_event(&mut self, changes: &[(String, String)], first_callback_only: bool) {
        let filtered: Vec<(String, String)> = changes
            .iter()
            .filter(|(name, _)| self.applies_to(name))
            .cloned()
            .collect();
        if filtered.is_empty() {
            return;
        }
        match super::property_set_xml(&filtered) {
            Ok(body) => {
                let seq = self.key.take();
                self.queue.push_back(PendingEvent {
                    seq,
                    body,
                    first_callback_only,
                });
            }
            Err(e) => {
                tracing::warn!("❌ Cannot build propertyset for {}: {}", self.sid, e);
            }
        }
    }
}

/// Table `SID → Subscription` d'un service.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    subs: HashMap<String, Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub fn get_mut(&mut self, sid: &str) -> Option<&mut Subscription> {
        self.subs.get_mut(sid)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Subscription> {
        self.subs.values_mut()
    }

    /// Traite un SUBSCRIBE (première souscription ou renouvellement).
    ///
    /// `initial` est l'instantané de toutes les variables événementielles
    /// du service : l'événement SEQ=0 le portant est mis en file dès
    /// l'acceptation d'une première souscription.
    pub fn subscribe(
        &mut self,
        request: &SubscribeRequest,
        initial: &[(String, String)],
        now: Instant,
    ) -> Result<SubscribeAck, UpnpError> {
        match &request.sid {
            Some(sid) => {
                // Renouvellement : NT et CALLBACK doivent être absents.
                if request.nt.is_some() || request.callback.is_some() {
                    return Err(UpnpError::MalformedMessage(
                        "SUBSCRIBE renewal with NT or CALLBACK".to_string(),
                    ));
                }
                self.renew(sid, request.timeout, now)
            }
            None => self.first_subscribe(request, initial, now),
        }
    }

    fn first_subscribe(
        &mut self,
        request: &SubscribeRequest,
        initial: &[(String, String)],
        now: Instant,
    ) -> Result<SubscribeAck, UpnpError> {
        match request.nt.as_deref() {
            Some(NT_EVENT) => {}
            _ => {
                return Err(UpnpError::PreconditionFailed(
                    "SUBSCRIBE requires NT: upnp:event".to_string(),
                ));
            }
        }
        let callbacks = match &request.callback {
            Some(raw) => parse_callback(raw)?,
            None => {
                return Err(UpnpError::PreconditionFailed(
                    "SUBSCRIBE without CALLBACK".to_string(),
                ));
            }
        };

        let timeout_secs = effective_timeout(request.timeout);
        let sid = format!("uuid:{}", Uuid::new_v4());

        let mut subscription = Subscription {
            sid: sid.clone(),
            callbacks,
            timeout_secs,
            expires_at: now + Duration::from_secs(u64::from(timeout_secs)),
            statevars: request.statevars.clone(),
            key: EventKey::new(),
            queue: VecDeque::new(),
            in_flight: false,
        };

        // Événement initial : toutes les variables événementielles,
        // SEQ=0, première URL seulement.
        subscription.push_event(initial, true);
        self.subs.insert(sid.clone(), subscription);

        Ok(SubscribeAck { sid, timeout_secs })
    }

    /// Renouvelle une souscription existante (réarme l'expiration).
    pub fn renew(
        &mut self,
        sid: &str,
        timeout: Option<GenaTimeout>,
        now: Instant,
    ) -> Result<SubscribeAck, UpnpError> {
        let subscription = self
            .subs
            .get_mut(sid)
            .ok_or_else(|| UpnpError::PreconditionFailed(format!("unknown SID {sid}")))?;

        let timeout_secs = effective_timeout(timeout);
        subscription.timeout_secs = timeout_secs;
        subscription.expires_at = now + Duration::from_secs(u64::from(timeout_secs));

        Ok(SubscribeAck {
            sid: sid.to_string(),
            timeout_secs,
        })
    }

    /// Retire une souscription ; SID inconnu → 412.
    pub fn unsubscribe(&mut self, sid: &str) -> Result<(), UpnpError> {
        self.subs
            .remove(sid)
            .map(|_| ())
            .ok_or_else(|| UpnpError::PreconditionFailed(format!("unknown SID {sid}")))
    }

    /// Met en file un changement d'état pour toutes les souscriptions.
    pub fn publish(&mut self, changes: &[(String, String)]) {
        for subscription in self.subs.values_mut() {
            subscription.push_event(changes, false);
        }
    }

    /// Retire les souscriptions expirées et retourne leurs SIDs.
    pub fn remove_expired(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .subs
            .values()
            .filter(|s| now >= s.expires_at)
            .map(|s| s.sid.clone())
            .collect();
        for sid in &expired {
            self.subs.remove(sid);
        }
        expired
    }
}

/// Timeout effectif : demandé borné dans [1800, 604800], défaut 1800.
fn effective_timeout(requested: Option<GenaTimeout>) -> u32 {
    match requested {
        Some(GenaTimeout::Seconds(n)) => clamp_timeout(n),
        Some(GenaTimeout::Infinite) => super::TIMEOUT_MAX,
        None => TIMEOUT_DEFAULT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_request() -> SubscribeRequest {
        SubscribeRequest {
            sid: None,
            nt: Some(NT_EVENT.to_string()),
            callback: Some("<http://192.0.2.20:5000/evt>".to_string()),
            timeout: Some(GenaTimeout::Seconds(1800)),
            statevars: None,
        }
    }

    fn initial() -> Vec<(String, String)> {
        vec![
            ("Status".to_string(), "0".to_string()),
            ("Level".to_string(), "3".to_string()),
        ]
    }

    #[test]
    fn first_subscription_queues_the_initial_event() {
        let mut table = SubscriptionTable::new();
        let ack = table
            .subscribe(&first_request(), &initial(), Instant::now())
            .unwrap();

        assert!(ack.sid.starts_with("uuid:"));
        assert_eq!(ack.timeout_secs, 1800);

        let sub = table.get_mut(&ack.sid).unwrap();
        assert_eq!(sub.queue.len(), 1);
        let event = sub.queue.front().unwrap();
        assert_eq!(event.seq, 0);
        assert!(event.first_callback_only);
        assert!(event.body.contains("<Status>0</Status>"));
        assert!(event.body.contains("<Level>3</Level>"));
    }

    #[test]
    fn timeout_is_clamped_and_defaulted() {
        let mut table = SubscriptionTable::new();

        let mut request = first_request();
        request.timeout = Some(GenaTimeout::Seconds(10));
        let ack = table.subscribe(&request, &[], Instant::now()).unwrap();
        assert_eq!(ack.timeout_secs, 1800);

        let mut request = first_request();
        request.timeout = None;
        let ack = table.subscribe(&request, &[], Instant::now()).unwrap();
        assert_eq!(ack.timeout_secs, 1800);

        let mut request = first_request();
        request.timeout = Some(GenaTimeout::Infinite);
        let ack = table.subscribe(&request, &[], Instant::now()).unwrap();
        assert_eq!(ack.timeout_secs, super::super::TIMEOUT_MAX);
    }

    #[test]
    fn seq_numbers_are_strictly_sequential() {
        let mut table = SubscriptionTable::new();
        let ack = table
            .subscribe(&first_request(), &initial(), Instant::now())
            .unwrap();

        table.publish(&[("Status".to_string(), "1".to_string())]);
        table.publish(&[("Status".to_string(), "0".to_string())]);

        let sub = table.get_mut(&ack.sid).unwrap();
        let seqs: Vec<u32> = sub.queue.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn renewal_requires_clean_headers() {
        let mut table = SubscriptionTable::new();
        let ack = table
            .subscribe(&first_request(), &[], Instant::now())
            .unwrap();

        // SID + CALLBACK : combinaison en conflit → 400.
        let mut conflicting = first_request();
        conflicting.sid = Some(ack.sid.clone());
        assert!(matches!(
            table.subscribe(&conflicting, &[], Instant::now()),
            Err(UpnpError::MalformedMessage(_))
        ));

        // Renouvellement propre.
        let renewal = SubscribeRequest {
            sid: Some(ack.sid.clone()),
            timeout: Some(GenaTimeout::Seconds(3600)),
            ..Default::default()
        };
        let renewed = table.subscribe(&renewal, &[], Instant::now()).unwrap();
        assert_eq!(renewed.sid, ack.sid);
        assert_eq!(renewed.timeout_secs, 3600);
    }

    #[test]
    fn unknown_sid_is_a_precondition_failure() {
        let mut table = SubscriptionTable::new();
        assert!(matches!(
            table.renew("uuid:nope", None, Instant::now()),
            Err(UpnpError::PreconditionFailed(_))
        ));
        assert!(matches!(
            table.unsubscribe("uuid:nope"),
            Err(UpnpError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn missing_nt_or_callback_is_rejected() {
        let mut table = SubscriptionTable::new();

        let mut request = first_request();
        request.nt = None;
        assert!(matches!(
            table.subscribe(&request, &[], Instant::now()),
            Err(UpnpError::PreconditionFailed(_))
        ));

        let mut request = first_request();
        request.callback = None;
        assert!(matches!(
            table.subscribe(&request, &[], Instant::now()),
            Err(UpnpError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn statevar_filter_limits_event_content() {
        let mut table = SubscriptionTable::new();
        let mut request = first_request();
        request.statevars = Some(vec!["Status".to_string()]);
        let ack = table
            .subscribe(&request, &initial(), Instant::now())
            .unwrap();

        table.publish(&[("Level".to_string(), "5".to_string())]);

        let sub = table.get_mut(&ack.sid).unwrap();
        // L'initial filtré ne contient que Status ; le changement de
        // Level est invisible pour cette souscription.
        assert_eq!(sub.queue.len(), 1);
        assert!(!sub.queue.front().unwrap().body.contains("Level"));
    }

    #[test]
    fn expiry_removes_the_subscription() {
        let mut table = SubscriptionTable::new();
        let now = Instant::now();
        let ack = table.subscribe(&first_request(), &[], now).unwrap();

        assert!(table.remove_expired(now).is_empty());
        let expired = table.remove_expired(now + Duration::from_secs(1801));
        assert_eq!(expired, vec![ack.sid.clone()]);
        assert!(table.is_empty());
    }
}
