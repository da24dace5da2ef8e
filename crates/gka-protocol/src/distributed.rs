//! Star ("distributed") key agreement.
//!
//! The sponsor draws a random group secret and hands it to every member
//! over a pairwise Diffie-Hellman channel: the member's REQUEST carries its
//! public value, the sponsor answers with a DISTRIBUTED_RESPONSE holding
//! the group secret sealed under a key derived from the shared secret.
//! Members acknowledge with FINISH_ACK until the sponsor, having heard
//! from everyone, broadcasts FINISH.
use std::collections::HashSet;
use std::sync::Arc;

use gka_metrics::{CountMetric, StatisticsSink, TimeMetric};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::MemberConfig;
use crate::crypto::{
    open_group_secret, seal_group_secret, KeyExchange, PublicValue, Secret, X25519Exchange,
    KEY_LEN, NONCE_LEN,
};
use crate::error::Absorbed;
use crate::message::{DistributedResponse, Find, Message, Offer, Request};
use crate::protocol::{KeyAgreementProtocol, MemberStatus};
use crate::runtime::{Effect, ProtocolEvent};
use crate::scheduler::Task;
use crate::types::{Endpoint, MemberId, ServiceId};
use crate::GkaError;

pub struct DistributedMember {
    config: MemberConfig,
    local: Endpoint,
    kx: Box<dyn KeyExchange>,
    rng: StdRng,
    stats: Arc<dyn StatisticsSink>,
    secret: Secret,
    public: PublicValue,
    group_secret: Option<Secret>,
    /// Sponsor: one cached answer per served member, in service order.
    served: IndexMap<Endpoint, DistributedResponse>,
    /// Member: where the group secret came from.
    sponsor: Option<Endpoint>,
    armed: HashSet<Task>,
    offer_seen: bool,
    finishing: bool,
    finish_acks: HashSet<Endpoint>,
    finished: bool,
}

impl DistributedMember {
    pub fn new(
        config: MemberConfig,
        local: Endpoint,
        stats: Arc<dyn StatisticsSink>,
    ) -> Result<Self, GkaError> {
        Self::with_key_exchange(config, local, stats, Box::new(X25519Exchange))
    }

    pub fn with_key_exchange(
        config: MemberConfig,
        local: Endpoint,
        stats: Arc<dyn StatisticsSink>,
        kx: Box<dyn KeyExchange>,
    ) -> Result<Self, GkaError> {
        config.validate()?;
        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let (secret, public) = kx.generate_keypair(&mut rng);
        stats.record_count(CountMetric::CryptoOperationsCount);
        Ok(Self {
            config,
            local,
            kx,
            rng,
            stats,
            secret,
            public,
            group_secret: None,
            served: IndexMap::new(),
            sponsor: None,
            armed: HashSet::new(),
            offer_seen: false,
            finishing: false,
            finish_acks: HashSet::new(),
            finished: false,
        })
    }

    pub fn public_value(&self) -> &PublicValue {
        &self.public
    }

    /// Members served so far (sponsor only).
    pub fn served(&self) -> usize {
        self.served.len()
    }

    fn service(&self) -> ServiceId {
        self.config.service_id
    }

    fn others(&self) -> usize {
        self.config.member_count as usize - 1
    }

    fn send(&self, out: &mut Vec<Effect>, to: Option<Endpoint>, message: Message) {
        self.stats
            .record_count(message.message_type().count_metric());
        match to {
            Some(to) => out.push(Effect::Unicast { to, message }),
            None => out.push(Effect::Multicast(message)),
        }
    }

    fn schedule(&mut self, out: &mut Vec<Effect>, task: Task) {
        if self.armed.insert(task) {
            let delay = self.config.scatter_delay.sample(&mut self.rng);
            out.push(Effect::Schedule { task, delay });
        }
    }

    fn repeat(
        &mut self,
        out: &mut Vec<Effect>,
        task: Task,
        to: Option<Endpoint>,
        message: Message,
    ) {
        if self.armed.contains(&task) {
            return;
        }
        self.send(out, to, message);
        self.schedule(out, task);
    }

    fn cancel(&mut self, out: &mut Vec<Effect>, task: Task) {
        if self.armed.remove(&task) {
            out.push(Effect::Cancel(task));
        }
    }

    fn established(&self, out: &mut Vec<Effect>, secret: &Secret) {
        let fingerprint = secret.short_repr();
        info!(group_key = %fingerprint, "group key established");
        out.push(Effect::Emit(ProtocolEvent::GroupKeyEstablished {
            member_id: self.member_id(),
            fingerprint,
        }));
    }

    fn finish(&mut self, out: &mut Vec<Effect>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.stats.record_timestamp(TimeMetric::DurationEnd);
        info!(sponsor = self.config.is_sponsor, "key agreement finished");
        out.push(Effect::Emit(ProtocolEvent::Finished {
            member_id: self.member_id(),
        }));
        out.push(Effect::Terminate);
    }

    fn offer(&self) -> Message {
        Message::Offer(Offer {
            offered_service: self.service(),
        })
    }

    // ── Sponsor ──────────────────────────────────────────────────────

    fn serve(
        &mut self,
        from: Endpoint,
        requester: &PublicValue,
    ) -> Result<DistributedResponse, GkaError> {
        let group_secret = self
            .group_secret
            .as_ref()
            .ok_or_else(|| GkaError::Crypto("sponsor without a group secret".into()))?;
        let shared = self.kx.agree(&self.secret, requester)?;
        self.stats.record_count(CountMetric::CryptoOperationsCount);

        let mut iv = [0u8; NONCE_LEN];
        self.rng.fill_bytes(&mut iv);
        let encrypted_group_secret = seal_group_secret(&shared, group_secret, &iv)?;
        let response = DistributedResponse {
            offered_service: self.service(),
            sponsor_public_value: self.public.clone(),
            encrypted_group_secret,
            iv: iv.to_vec(),
        };
        self.served.insert(from, response.clone());
        Ok(response)
    }

    fn start_finish(&mut self, out: &mut Vec<Effect>) {
        info!(acks = self.finish_acks.len(), "every member holds the key, finishing");
        self.finishing = true;
        self.cancel(out, Task::Offer);
        self.repeat(out, Task::Finish, None, Message::Finish);
        self.armed.insert(Task::FinishTimeout);
        out.push(Effect::Schedule {
            task: Task::FinishTimeout,
            delay: self.config.finish_timeout,
        });
    }

    fn guard(&self, task: Task) -> bool {
        if self.finished {
            return false;
        }
        match task {
            Task::Offer => self.config.is_sponsor && !self.finishing,
            Task::Find => self.group_secret.is_none() && !self.offer_seen,
            Task::Request => self.group_secret.is_none(),
            Task::FinishAck => self.sponsor.is_some(),
            Task::Finish | Task::FinishTimeout => self.finishing,
            _ => false,
        }
    }
}

impl KeyAgreementProtocol for DistributedMember {
    fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    fn on_start(&mut self) -> Vec<Effect> {
        let mut out = Vec::new();
        self.stats.record_count(CountMetric::MemberCount);
        self.stats.record_timestamp(TimeMetric::DurationStart);

        if !self.config.is_sponsor {
            let find = Message::Find(Find {
                required_service: self.service(),
            });
            self.repeat(&mut out, Task::Find, None, find);
            return out;
        }

        self.stats.record_timestamp(TimeMetric::KeyAgreementStart);
        let mut bytes = vec![0u8; KEY_LEN];
        self.rng.fill_bytes(&mut bytes);
        let group_secret = Secret::from_bytes(bytes);
        info!(service = self.service(), "distributing a fresh group secret");
        out.push(Effect::Emit(ProtocolEvent::Assigned { member_id: 1 }));
        out.push(Effect::Emit(ProtocolEvent::BecameSponsor { member_id: 1 }));
        self.established(&mut out, &group_secret);
        self.group_secret = Some(group_secret);

        if self.others() == 0 {
            self.finish(&mut out);
            return out;
        }
        let offer = self.offer();
        self.repeat(&mut out, Task::Offer, None, offer);
        out
    }

    fn on_timer(&mut self, task: Task) -> Vec<Effect> {
        let mut out = Vec::new();
        self.armed.remove(&task);
        if !self.guard(task) {
            Absorbed::TimerRace(task).log();
            return out;
        }
        match task {
            Task::Offer => {
                let offer = self.offer();
                self.repeat(&mut out, task, None, offer);
            }
            Task::Find => {
                let find = Message::Find(Find {
                    required_service: self.service(),
                });
                self.repeat(&mut out, task, None, find);
            }
            Task::Request => {
                let request = Message::Request(Request {
                    required_service: self.service(),
                    requester_public_value: self.public.clone(),
                });
                self.send(&mut out, None, request);
            }
            Task::FinishAck => {
                let sponsor = self.sponsor;
                self.repeat(&mut out, task, sponsor, Message::FinishAck);
            }
            Task::Finish => self.repeat(&mut out, task, None, Message::Finish),
            Task::FinishTimeout => self.finish(&mut out),
            _ => {}
        }
        out
    }

    fn on_find(&mut self, msg: Find, _from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if msg.required_service == self.service() && self.guard(Task::Offer) {
            let offer = self.offer();
            self.send(&mut out, None, offer);
        }
        out
    }

    fn on_offer(&mut self, msg: Offer, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if msg.offered_service != self.service() || !self.guard(Task::Request) {
            return out;
        }
        if !self.offer_seen {
            debug!(%from, "sponsor found");
            self.offer_seen = true;
            self.stats.record_timestamp(TimeMetric::KeyAgreementStart);
        }
        self.schedule(&mut out, Task::Request);
        out
    }

    fn on_request(&mut self, msg: Request, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if !self.config.is_sponsor || msg.required_service != self.service() || self.finished {
            return out;
        }
        if let Some(cached) = self.served.get(&from) {
            debug!(%from, "resending cached response");
            let cached = Message::DistributedResponse(cached.clone());
            self.send(&mut out, Some(from), cached);
            return out;
        }
        if self.served.len() >= self.others() {
            debug!(%from, "group is full, ignoring REQUEST");
            return out;
        }
        match self.serve(from, &msg.requester_public_value) {
            Ok(response) => {
                let member_id = self.served.len() as MemberId + 1;
                info!(member_id, endpoint = %from, "group secret sent");
                out.push(Effect::Emit(ProtocolEvent::Admitted {
                    member_id,
                    endpoint: from,
                }));
                self.send(&mut out, Some(from), Message::DistributedResponse(response));
            }
            Err(e) => warn!(%from, error = %e, "cannot serve requester"),
        }
        out
    }

    fn on_distributed_response(&mut self, msg: DistributedResponse, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if msg.offered_service != self.service() || self.config.is_sponsor || self.finished {
            return out;
        }
        if self.group_secret.is_some() {
            return out;
        }
        let opened = self
            .kx
            .agree(&self.secret, &msg.sponsor_public_value)
            .and_then(|shared| open_group_secret(&shared, &msg.encrypted_group_secret, &msg.iv));
        self.stats.record_count(CountMetric::CryptoOperationsCount);
        let group_secret = match opened {
            Ok(secret) => secret,
            Err(e) => {
                let description = format!("cannot open group secret from {from}: {e}");
                warn!("{description}");
                out.push(Effect::Emit(ProtocolEvent::Error { description }));
                return out;
            }
        };

        self.sponsor = Some(from);
        self.cancel(&mut out, Task::Request);
        self.cancel(&mut out, Task::Find);
        self.established(&mut out, &group_secret);
        self.group_secret = Some(group_secret);
        self.repeat(&mut out, Task::FinishAck, Some(from), Message::FinishAck);
        out
    }

    fn on_finish(&mut self, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if self.config.is_sponsor || self.finished {
            return out;
        }
        if self.group_secret.is_none() {
            warn!(%from, "FINISH before receiving the group secret");
        }
        self.cancel(&mut out, Task::FinishAck);
        self.finish(&mut out);
        out
    }

    fn on_finish_ack(&mut self, from: Endpoint) -> Vec<Effect> {
        let mut out = Vec::new();
        if !self.config.is_sponsor || self.finishing || self.finished {
            return out;
        }
        if !self.served.contains_key(&from) {
            debug!(%from, "FINISH_ACK from a member we never served");
            return out;
        }
        self.finish_acks.insert(from);
        if self.finish_acks.len() >= self.others() {
            self.start_finish(&mut out);
        }
        out
    }

    fn group_secret(&self) -> Option<&Secret> {
        self.group_secret.as_ref()
    }

    fn member_id(&self) -> Option<MemberId> {
        // Only the sponsor has a position in the star.
        self.config.is_sponsor.then_some(1)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn status(&self) -> MemberStatus {
        MemberStatus {
            member_id: self.member_id(),
            is_sponsor: self.config.is_sponsor,
            keys_computed: u16::from(self.group_secret.is_some()),
            finished: self.finished,
            group_key: self.group_secret.as_ref().map(Secret::short_repr),
        }
    }
}
