//! The TCP connection state machine driven by NAT-translated segments.
//!
//! [`transition`] is a pure function over the table in the specification:
//! given the current state, which side the segment is travelling, its
//! flags, and the sequence numbers involved, it returns the next state
//! and any sequence-number side effects. Transitions not named in the
//! table leave the state unchanged.

use crate::nat::mapping::TcpConnState;
use crate::net::tcp::TcpFlags;

/// Direction a segment is travelling relative to the NAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Internal -> external.
    Outbound,
    /// External -> internal.
    Inbound,
}

/// Result of applying one segment to a connection's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: TcpConnState,
    pub client_seq: Option<u32>,
    pub server_seq: Option<u32>,
    /// Set when this inbound segment should be parked as an unsolicited
    /// SYN (transitions to or remains in syn-sent/syn-received on an
    /// inbound SYN).
    pub park_as_unsolicited: bool,
}

#[allow(clippy::too_many_arguments)]
pub fn transition(
    state: TcpConnState,
    dir: Direction,
    flags: TcpFlags,
    seq: u32,
    ack: u32,
    client_seq: u32,
    server_seq: u32,
) -> Transition {
    let syn = flags.contains(TcpFlags::SYN);
    let has_ack = flags.contains(TcpFlags::ACK);
    let fin = flags.contains(TcpFlags::FIN);

    let unchanged = Transition {
        state,
        client_seq: None,
        server_seq: None,
        park_as_unsolicited: false,
    };

    match (state, dir) {
        (TcpConnState::Closed, Direction::Outbound) if syn && !has_ack && ack == 0 => Transition {
            state: TcpConnState::SynSent,
            client_seq: Some(seq),
            server_seq: None,
            park_as_unsolicited: false,
        },

        (TcpConnState::SynSent, Direction::Inbound) if syn && has_ack && ack == client_seq.wrapping_add(1) => {
            Transition {
                state: TcpConnState::SynReceived,
                client_seq: None,
                server_seq: Some(seq),
                park_as_unsolicited: true,
            }
        }

        (TcpConnState::SynSent, Direction::Inbound) if syn && !has_ack && ack == 0 => Transition {
            state: TcpConnState::SynReceived,
            client_seq: None,
            server_seq: Some(seq),
            park_as_unsolicited: true,
        },

        (TcpConnState::SynReceived, Direction::Outbound)
            if !syn
                && has_ack
                && seq == client_seq.wrapping_add(1)
                && ack == server_seq.wrapping_add(1) =>
        {
            Transition {
                state: TcpConnState::Established,
                client_seq: Some(seq),
                server_seq: None,
                park_as_unsolicited: false,
            }
        }

        (TcpConnState::SynReceived, Direction::Inbound) if syn => Transition {
            park_as_unsolicited: true,
            ..unchanged
        },

        (TcpConnState::Established, Direction::Outbound) if fin && has_ack => Transition {
            state: TcpConnState::Closed,
            client_seq: Some(seq),
            server_seq: None,
            park_as_unsolicited: false,
        },

        _ => unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_syn_opens_syn_sent() {
        let t = transition(TcpConnState::Closed, Direction::Outbound, TcpFlags::SYN, 1000, 0, 0, 0);
        assert_eq!(t.state, TcpConnState::SynSent);
        assert_eq!(t.client_seq, Some(1000));
    }

    #[test]
    fn inbound_synack_completes_to_syn_received() {
        let t = transition(
            TcpConnState::SynSent,
            Direction::Inbound,
            TcpFlags::SYN | TcpFlags::ACK,
            2000,
            1001,
            1000,
            0,
        );
        assert_eq!(t.state, TcpConnState::SynReceived);
        assert_eq!(t.server_seq, Some(2000));
        assert!(t.park_as_unsolicited);
    }

    #[test]
    fn simultaneous_open_syn_without_ack_also_completes() {
        let t = transition(
            TcpConnState::SynSent,
            Direction::Inbound,
            TcpFlags::SYN,
            2000,
            0,
            1000,
            0,
        );
        assert_eq!(t.state, TcpConnState::SynReceived);
        assert_eq!(t.server_seq, Some(2000));
    }

    #[test]
    fn outbound_ack_completes_handshake() {
        let t = transition(
            TcpConnState::SynReceived,
            Direction::Outbound,
            TcpFlags::ACK,
            1001,
            2001,
            1000,
            2000,
        );
        assert_eq!(t.state, TcpConnState::Established);
        assert_eq!(t.client_seq, Some(1001));
    }

    #[test]
    fn outbound_finack_closes_from_established() {
        let t = transition(
            TcpConnState::Established,
            Direction::Outbound,
            TcpFlags::FIN | TcpFlags::ACK,
            5000,
            6000,
            4999,
            5999,
        );
        assert_eq!(t.state, TcpConnState::Closed);
        assert_eq!(t.client_seq, Some(5000));
    }

    #[test]
    fn unmatched_transition_leaves_state_unchanged() {
        let t = transition(TcpConnState::Established, Direction::Outbound, TcpFlags::ACK, 1, 1, 0, 0);
        assert_eq!(t.state, TcpConnState::Established);
        assert_eq!(t.client_seq, None);
        assert_eq!(t.server_seq, None);
    }
}
