use serde::{Deserialize, Serialize};

/// Monotonic counters recorded by a member.
///
/// Declaration order is the column order of the CSV output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountMetric {
    MemberCount,
    FindMessageCount,
    OfferMessageCount,
    RequestMessageCount,
    ResponseMessageCount,
    MemberInfoRequestMessageCount,
    MemberInfoResponseMessageCount,
    MemberInfoSynchRequestMessageCount,
    MemberInfoSynchResponseMessageCount,
    SynchTokenMessageCount,
    FinishMessageCount,
    FinishAckMessageCount,
    DistributedResponseMessageCount,
    CryptoOperationsCount,
}

impl CountMetric {
    pub const ALL: [CountMetric; 14] = [
        CountMetric::MemberCount,
        CountMetric::FindMessageCount,
        CountMetric::OfferMessageCount,
        CountMetric::RequestMessageCount,
        CountMetric::ResponseMessageCount,
        CountMetric::MemberInfoRequestMessageCount,
        CountMetric::MemberInfoResponseMessageCount,
        CountMetric::MemberInfoSynchRequestMessageCount,
        CountMetric::MemberInfoSynchResponseMessageCount,
        CountMetric::SynchTokenMessageCount,
        CountMetric::FinishMessageCount,
        CountMetric::FinishAckMessageCount,
        CountMetric::DistributedResponseMessageCount,
        CountMetric::CryptoOperationsCount,
    ];

    /// Column name used in CSV headers.
    pub fn name(self) -> &'static str {
        match self {
            CountMetric::MemberCount => "MEMBER_COUNT",
            CountMetric::FindMessageCount => "FIND_MESSAGE_COUNT",
            CountMetric::OfferMessageCount => "OFFER_MESSAGE_COUNT",
            CountMetric::RequestMessageCount => "REQUEST_MESSAGE_COUNT",
            CountMetric::ResponseMessageCount => "RESPONSE_MESSAGE_COUNT",
            CountMetric::MemberInfoRequestMessageCount => "MEMBER_INFO_REQUEST_MESSAGE_COUNT",
            CountMetric::MemberInfoResponseMessageCount => "MEMBER_INFO_RESPONSE_MESSAGE_COUNT",
            CountMetric::MemberInfoSynchRequestMessageCount => {
                "MEMBER_INFO_SYNCH_REQUEST_MESSAGE_COUNT"
            }
            CountMetric::MemberInfoSynchResponseMessageCount => {
                "MEMBER_INFO_SYNCH_RESPONSE_MESSAGE_COUNT"
            }
            CountMetric::SynchTokenMessageCount => "SYNCH_TOKEN_MESSAGE_COUNT",
            CountMetric::FinishMessageCount => "FINISH_MESSAGE_COUNT",
            CountMetric::FinishAckMessageCount => "FINISH_ACK_MESSAGE_COUNT",
            CountMetric::DistributedResponseMessageCount => "DISTRIBUTED_RESPONSE_MESSAGE_COUNT",
            CountMetric::CryptoOperationsCount => "CRYPTO_OPERATIONS_COUNT",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Points in time recorded once per member (Unix nanoseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeMetric {
    DurationStart,
    KeyAgreementStart,
    DurationEnd,
}

impl TimeMetric {
    pub const ALL: [TimeMetric; 3] = [
        TimeMetric::DurationStart,
        TimeMetric::KeyAgreementStart,
        TimeMetric::DurationEnd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TimeMetric::DurationStart => "DURATION_START",
            TimeMetric::KeyAgreementStart => "KEY_AGREEMENT_START",
            TimeMetric::DurationEnd => "DURATION_END",
        }
    }

    /// Start markers aggregate to the earliest value, end markers to the latest.
    pub fn is_start(self) -> bool {
        !matches!(self, TimeMetric::DurationEnd)
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub(crate) fn count_index(metric: CountMetric) -> usize {
    metric.index()
}

pub(crate) fn time_index(metric: TimeMetric) -> usize {
    metric.index()
}
