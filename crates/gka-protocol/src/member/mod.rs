//! Chained ("sequential sponsor hand-off") key agreement.
//!
//! Members join one at a time. The current sponsor extends its key tree
//! with the newcomer's public value, publishes the previous root public
//! value in a RESPONSE and hands the sponsor role over. Every other member
//! applies the newcomer's public value to its own tree in strict id order
//! (the key cascade). Once the last member is in, a token walks the ring
//! so every member fills its gaps before the last member broadcasts FINISH.
//!
//! Handlers are split by phase: [`sponsor`] (discovery answers and
//! admission), [`join`] (offer, response and cascade) and [`synch`]
//! (token round and termination).
mod directory;
mod join;
mod sponsor;
mod synch;

pub use directory::MemberDirectory;

use std::collections::HashSet;
use std::sync::Arc;

use gka_metrics::{CountMetric, StatisticsSink, TimeMetric};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::MemberConfig;
use crate::crypto::{KeyExchange, PublicValue, Secret, X25519Exchange};
use crate::error::Absorbed;
use crate::key_tree::KeyTree;
use crate::message::{
    Find, MemberInfoRequest, MemberInfoResponse, Message, Offer, Request, Response, SynchToken,
};
use crate::protocol::{KeyAgreementProtocol, MemberStatus};
use crate::runtime::{Effect, ProtocolEvent};
use crate::scheduler::Task;
use crate::types::{successor, Endpoint, MemberId, ServiceId};
use crate::GkaError;

/// One member of a chained key agreement.
pub struct StrMember {
    config: MemberConfig,
    local: Endpoint,
    kx: Box<dyn KeyExchange>,
    rng: StdRng,
    stats: Arc<dyn StatisticsSink>,

    // ── Own contribution ─────────────────────────────────────────────
    secret: Secret,
    public: PublicValue,

    // ── Chain position ───────────────────────────────────────────────
    member_id: Option<MemberId>,
    is_sponsor: bool,
    keys_computed: u16,
    tree: Option<KeyTree>,

    // ── Bookkeeping ──────────────────────────────────────────────────
    /// Join candidates in arrival order.
    pending: IndexMap<Endpoint, PublicValue>,
    members: MemberDirectory,

    // ── Retransmission and synchronization ───────────────────────────
    /// Tasks with an outstanding deadline.
    armed: HashSet<Task>,
    offer_seen: bool,
    /// The candidate we handed the sponsor role to.
    admitted: Option<Endpoint>,
    last_response: Option<Response>,
    higher_member_id_assigned: bool,
    synch_token_received: bool,
    /// We are (or were) repeating the token towards our successor.
    token_forwarded: bool,
    /// Our successor picked the token up.
    synch_finished: bool,
    finishing: bool,
    finish_received: bool,
    finish_acks: HashSet<Endpoint>,
    established: bool,
    finished: bool,
}

impl StrMember {
    /// Create a member using X25519.
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
            member_id: None,
            is_sponsor: false,
            keys_computed: 0,
            tree: None,
            pending: IndexMap::new(),
            members: MemberDirectory::new(),
            armed: HashSet::new(),
            offer_seen: false,
            admitted: None,
            last_response: None,
            higher_member_id_assigned: false,
            synch_token_received: false,
            token_forwarded: false,
            synch_finished: false,
            finishing: false,
            finish_received: false,
            finish_acks: HashSet::new(),
            established: false,
            finished: false,
        })
    }

    pub fn public_value(&self) -> &PublicValue {
        &self.public
    }

    pub fn keys_computed(&self) -> u16 {
        self.keys_computed
    }

    pub fn is_sponsor(&self) -> bool {
        self.is_sponsor
    }

    pub fn key_tree(&self) -> Option<&KeyTree> {
        self.tree.as_ref()
    }

    pub fn members(&self) -> &MemberDirectory {
        &self.members
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // ── Derived state ────────────────────────────────────────────────

    fn member_count(&self) -> u16 {
        self.config.member_count
    }

    fn service(&self) -> ServiceId {
        self.config.service_id
    }

    fn serves(&self, service: ServiceId) -> bool {
        if service != self.config.service_id {
            debug!(service, "ignoring message for another service");
            return false;
        }
        true
    }

    /// Holds every contribution from its own id up to the last member.
    fn complete(&self) -> bool {
        match self.member_id {
            Some(id) => self.keys_computed == self.member_count() - id + 1,
            None => false,
        }
    }

    fn missing_predecessors(&self) -> Vec<MemberId> {
        match self.member_id {
            Some(id) => self.members.missing(1..id),
            None => Vec::new(),
        }
    }

    fn missing_successors(&self) -> Vec<MemberId> {
        match self.member_id.and_then(|id| self.keys_computed.checked_add(id)) {
            Some(next) => self.members.missing(next..=self.member_count()),
            None => Vec::new(),
        }
    }

    fn successor(&self) -> Option<MemberId> {
        self.member_id.map(|id| successor(id, self.member_count()))
    }

    // ── Message builders ─────────────────────────────────────────────

    fn find(&self) -> Message {
        Message::Find(Find {
            required_service: self.service(),
        })
    }

    fn offer(&self) -> Message {
        Message::Offer(Offer {
            offered_service: self.service(),
        })
    }

    fn request(&self) -> Message {
        Message::Request(Request {
            required_service: self.service(),
            requester_public_value: self.public.clone(),
        })
    }

    fn info_request(&self, ids: Vec<MemberId>) -> MemberInfoRequest {
        MemberInfoRequest {
            required_service: self.service(),
            requested_member_ids: ids,
        }
    }

    fn info_response(&self, member_id: MemberId) -> MemberInfoResponse {
        MemberInfoResponse {
            offered_service: self.service(),
            member_id,
            public_value: self.public.clone(),
        }
    }

    fn token(&self, target_member_id: MemberId) -> Message {
        Message::SynchToken(SynchToken { target_member_id })
    }

    // ── Effect helpers ───────────────────────────────────────────────

    fn multicast(&self, out: &mut Vec<Effect>, message: Message) {
        self.stats
            .record_count(message.message_type().count_metric());
        out.push(Effect::Multicast(message));
    }

    fn unicast(&self, out: &mut Vec<Effect>, to: Endpoint, message: Message) {
        self.stats
            .record_count(message.message_type().count_metric());
        out.push(Effect::Unicast { to, message });
    }

    /// Arm `task` after a scatter delay unless it is already armed.
    fn schedule(&mut self, out: &mut Vec<Effect>, task: Task) {
        if self.armed.insert(task) {
            let delay = self.config.scatter_delay.sample(&mut self.rng);
            out.push(Effect::Schedule { task, delay });
        }
    }

    /// Send now and keep repeating until the task's guard turns false.
    fn repeat(&mut self, out: &mut Vec<Effect>, task: Task, message: Message) {
        if self.armed.contains(&task) {
            return;
        }
        self.multicast(out, message);
        self.schedule(out, task);
    }

    fn cancel(&mut self, out: &mut Vec<Effect>, task: Task) {
        if self.armed.remove(&task) {
            out.push(Effect::Cancel(task));
        }
    }

    fn crypto_op(&self) {
        self.stats.record_count(CountMetric::CryptoOperationsCount);
    }

    fn key_computed(&self, out: &mut Vec<Effect>) {
        let root = self
            .tree
            .as_ref()
            .map(|t| t.root_secret().short_repr())
            .unwrap_or_default();
        debug!(keys_computed = self.keys_computed, %root, "key computed");
        out.push(Effect::Emit(ProtocolEvent::KeyComputed {
            keys_computed: self.keys_computed,
            root,
        }));
    }

    fn error(&self, out: &mut Vec<Effect>, description: String) {
        warn!("{description}");
        out.push(Effect::Emit(ProtocolEvent::Error { description }));
    }

    /// Record an assigned member and drop it from the candidates.
    fn record_member(&mut self, endpoint: Endpoint, id: MemberId, public: PublicValue) {
        if endpoint == self.local {
            return;
        }
        if self.members.record(endpoint, id, public) {
            debug!(member_id = id, %endpoint, "recorded member");
        }
        self.pending.shift_remove(&endpoint);
    }

    /// Messages only assigned members send. Seeing one from the member we
    /// admitted means it took over and our RESPONSE can stop.
    fn note_assigned_sender(&mut self, from: Endpoint) {
        if self.admitted == Some(from) && !self.higher_member_id_assigned {
            debug!(%from, "successor sponsor is active");
            self.higher_member_id_assigned = true;
        }
    }

    fn check_complete(&mut self, out: &mut Vec<Effect>) {
        if self.established || !self.complete() {
            return;
        }
        let Some(tree) = self.tree.as_ref() else {
            return;
        };
        self.established = true;
        let fingerprint = tree.root_secret().short_repr();
        info!(
            member_id = ?self.member_id,
            group_key = %fingerprint,
            "group key established"
        );
        out.push(Effect::Emit(ProtocolEvent::GroupKeyEstablished {
            member_id: self.member_id,
            fingerprint,
        }));
    }

    fn finish(&mut self, out: &mut Vec<Effect>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.stats.record_timestamp(TimeMetric::DurationEnd);
        info!(member_id = ?self.member_id, "key agreement finished");
        out.push(Effect::Emit(ProtocolEvent::Finished {
            member_id: self.member_id,
        }));
        out.push(Effect::Terminate);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    fn start(&mut self) -> Vec<Effect> {
        let mut out = Vec::new();
        self.stats.record_count(CountMetric::MemberCount);
        self.stats.record_timestamp(TimeMetric::DurationStart);

        if !self.config.is_sponsor {
            info!(service = self.service(), "looking for a sponsor");
            let find = self.find();
            self.repeat(&mut out, Task::Find, find);
            return out;
        }

        self.stats.record_timestamp(TimeMetric::KeyAgreementStart);
        self.tree = Some(KeyTree::build(
            self.secret.clone(),
            Some(self.public.clone()),
            Some(self.secret.clone()),
            self.public.clone(),
        ));
        self.member_id = Some(1);
        self.keys_computed = 1;
        self.is_sponsor = true;
        self.members.record(self.local, 1, self.public.clone());
        info!(service = self.service(), "initial sponsor");
        out.push(Effect::Emit(ProtocolEvent::Assigned { member_id: 1 }));
        out.push(Effect::Emit(ProtocolEvent::BecameSponsor { member_id: 1 }));
        self.key_computed(&mut out);

        if self.member_count() == 1 {
            self.check_complete(&mut out);
            self.finish(&mut out);
            return out;
        }

        let offer = self.offer();
        self.repeat(&mut out, Task::Offer, offer);
        out
    }

    /// Is `task` still worth running?
    fn guard(&self, task: Task) -> bool {
        if self.finished {
            return false;
        }
        match task {
            Task::Find => self.member_id.is_none() && !self.offer_seen,
            Task::Offer => self.is_sponsor && self.member_id < Some(self.member_count()),
            Task::Request => self.member_id.is_none(),
            Task::Response => !self.higher_member_id_assigned && self.last_response.is_some(),
            Task::MemberInfoRequest => self.accepting(),
            Task::MemberInfoResponse | Task::SynchResponse => self.member_id.is_some(),
            Task::SynchRequest => {
                self.synch_token_received && !self.complete() && !self.finish_received
            }
            Task::SynchToken => {
                !self.synch_finished && !self.finishing && !self.finish_received
            }
            Task::Finish | Task::FinishTimeout => self.finishing,
            Task::FinishAck => false,
        }
    }

    fn timer(&mut self, task: Task) -> Vec<Effect> {
        let mut out = Vec::new();
        self.armed.remove(&task);
        if !self.guard(task) {
            Absorbed::TimerRace(task).log();
            return out;
        }

        match task {
            Task::Find => {
                let find = self.find();
                self.repeat(&mut out, task, find);
            }
            Task::Offer => {
                let offer = self.offer();
                self.repeat(&mut out, task, offer);
            }
            Task::Request => {
                // One REQUEST per OFFER burst; the sponsor keeps offering.
                let request = self.request();
                self.multicast(&mut out, request);
            }
            Task::Response => {
                if let Some(response) = self.last_response.clone() {
                    self.repeat(&mut out, task, Message::Response(response));
                }
            }
            // Asks again while predecessors are missing, then admits or offers.
            Task::MemberInfoRequest => self.admit_next(&mut out),
            Task::MemberInfoResponse => {
                if let Some(id) = self.member_id {
                    let response = self.info_response(id);
                    self.multicast(&mut out, Message::MemberInfoResponse(response));
                }
            }
            Task::SynchRequest => {
                let missing = self.missing_successors();
                if !missing.is_empty() {
                    let request = self.info_request(missing);
                    self.repeat(&mut out, task, Message::MemberInfoSynchRequest(request));
                }
            }
            Task::SynchResponse => {
                if let Some(id) = self.member_id {
                    let response = self.info_response(id);
                    self.multicast(&mut out, Message::MemberInfoSynchResponse(response));
                }
            }
            Task::SynchToken => {
                if let Some(next) = self.successor() {
                    let token = self.token(next);
                    self.repeat(&mut out, task, token);
                }
            }
            Task::Finish => self.repeat(&mut out, task, Message::Finish),
            Task::FinishTimeout => {
                warn!(
                    acks = self.finish_acks.len(),
                    expected = self.member_count() - 1,
                    "finish timeout elapsed before every member acknowledged"
                );
                self.finish(&mut out);
            }
            Task::FinishAck => {}
        }
        out
    }
}

impl KeyAgreementProtocol for StrMember {
    fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    fn on_start(&mut self) -> Vec<Effect> {
        self.start()
    }

    fn on_timer(&mut self, task: Task) -> Vec<Effect> {
        self.timer(task)
    }

    fn on_find(&mut self, msg: Find, from: Endpoint) -> Vec<Effect> {
        self.handle_find(msg, from)
    }

    fn on_offer(&mut self, msg: Offer, from: Endpoint) -> Vec<Effect> {
        self.handle_offer(msg, from)
    }

    fn on_request(&mut self, msg: Request, from: Endpoint) -> Vec<Effect> {
        self.handle_request(msg, from)
    }

    fn on_response(&mut self, msg: Response, from: Endpoint) -> Vec<Effect> {
        self.handle_response(msg, from)
    }

    fn on_member_info_request(&mut self, msg: MemberInfoRequest, from: Endpoint) -> Vec<Effect> {
        self.handle_member_info_request(msg, from, false)
    }

    fn on_member_info_response(&mut self, msg: MemberInfoResponse, from: Endpoint) -> Vec<Effect> {
        self.handle_member_info_response(msg, from)
    }

    fn on_member_info_synch_request(
        &mut self,
        msg: MemberInfoRequest,
        from: Endpoint,
    ) -> Vec<Effect> {
        self.handle_member_info_request(msg, from, true)
    }

    fn on_member_info_synch_response(
        &mut self,
        msg: MemberInfoResponse,
        from: Endpoint,
    ) -> Vec<Effect> {
        self.handle_member_info_response(msg, from)
    }

    fn on_synch_token(&mut self, msg: SynchToken, from: Endpoint) -> Vec<Effect> {
        self.handle_synch_token(msg, from)
    }

    fn on_finish(&mut self, from: Endpoint) -> Vec<Effect> {
        self.handle_finish(from)
    }

    fn on_finish_ack(&mut self, from: Endpoint) -> Vec<Effect> {
        self.handle_finish_ack(from)
    }

    fn group_secret(&self) -> Option<&Secret> {
        if !self.complete() {
            return None;
        }
        self.tree.as_ref().map(KeyTree::root_secret)
    }

    fn member_id(&self) -> Option<MemberId> {
        self.member_id
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn status(&self) -> MemberStatus {
        MemberStatus {
            member_id: self.member_id,
            is_sponsor: self.is_sponsor,
            keys_computed: self.keys_computed,
            finished: self.finished,
            group_key: self.group_secret().map(Secret::short_repr),
        }
    }
}
