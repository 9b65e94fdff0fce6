//! JACK backend for the MIDI scheduler.
//!
//! ```no_run
//! use jackpatch_jack::{JackClient, JackServer, sched::Direction};
//!
//! let mut client = JackClient::new("jackpatch", JackServer::default());
//! let out = client.register_port("out", Direction::Output)?;
//!
//! // middle C, in 10ms
//! client.send(&out, &[0x90, 60, 100], 0.01)?;
//! # Ok::<(), jackpatch_jack::sched::Error>(())
//! ```

pub use jackpatch_sched as sched;

mod block;
mod server;

pub use block::{JackBlock, JackProcess, JackWriter};
pub use server::JackServer;

/// A scheduler client of a JACK server.
pub type JackClient = sched::Client<JackServer>;

fn connection_error(e: jack::Error) -> sched::ConnectionError {
    match e {
        jack::Error::ClientError(status) if status.contains(jack::ClientStatus::SERVER_FAILED) => {
            sched::ConnectionError::ServerUnreachable
        }
        jack::Error::ClientError(status) if status.contains(jack::ClientStatus::SERVER_ERROR) => {
            sched::ConnectionError::Communication
        }
        e => sched::ConnectionError::ClientCreation(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched::ConnectionError;

    #[test]
    fn client_status_maps_to_connection_errors() {
        let status = |s| jack::Error::ClientError(jack::ClientStatus::FAILURE | s);

        assert_eq!(
            connection_error(status(jack::ClientStatus::SERVER_FAILED)),
            ConnectionError::ServerUnreachable
        );
        assert_eq!(
            connection_error(status(jack::ClientStatus::SERVER_ERROR)),
            ConnectionError::Communication
        );
        assert!(matches!(
            connection_error(status(jack::ClientStatus::NAME_NOT_UNIQUE)),
            ConnectionError::ClientCreation(_)
        ));
        assert!(matches!(
            connection_error(jack::Error::NotEnoughSpace),
            ConnectionError::ClientCreation(_)
        ));
    }
}
