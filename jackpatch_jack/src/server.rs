use core::mem;

use crate::{
    JackProcess, connection_error,
    sched::{ActivationError, ConnectionError, PortError, Processor, Server},
};

#[derive(Default)]
enum State {
    #[default]
    Closed,
    Open(jack::Client),
    Active(jack::AsyncClient<(), JackProcess>),
}

/// A connection to a running JACK server. Never starts one.
#[derive(Default)]
pub struct JackServer {
    state: State,
}

impl JackServer {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn client(&self) -> Option<&jack::Client> {
        match &self.state {
            State::Closed => None,
            State::Open(client) => Some(client),
            State::Active(client) => Some(client.as_client()),
        }
    }
}

fn registration_error(name: &str, e: jack::Error) -> PortError {
    PortError::Registration {
        name: name.to_owned(),
        reason: e.to_string(),
    }
}

fn register<PS: jack::PortSpec>(
    client: Option<&jack::Client>,
    name: &str,
    spec: PS,
) -> Result<(jack::Port<PS>, String), PortError> {
    let client = client.ok_or(PortError::Closed)?;

    let port = client
        .register_port(name, spec)
        .map_err(|e| registration_error(name, e))?;

    Ok((port, format!("{}:{name}", client.name())))
}

impl Server for JackServer {
    type Output = jack::Port<jack::MidiOut>;
    type Input = jack::Port<jack::MidiIn>;

    fn open(&mut self, client_name: &str) -> Result<(), ConnectionError> {
        if self.is_open() {
            return Ok(());
        }

        let (client, status) = jack::Client::new(client_name, jack::ClientOptions::NO_START_SERVER)
            .map_err(connection_error)?;

        log::debug!("JACK client \"{}\" created, status: {status:?}", client.name());

        self.state = State::Open(client);

        Ok(())
    }

    fn close(&mut self) {
        // dropping the client closes it
        if let State::Active(client) = mem::take(&mut self.state) {
            if let Err(e) = client.deactivate() {
                log::warn!("failed to deactivate JACK client: {e}");
            }
        }
    }

    fn is_open(&self) -> bool {
        !matches!(self.state, State::Closed)
    }

    fn sample_rate(&self) -> Option<u32> {
        self.client()
            .map(|c| u32::try_from(c.sample_rate()).unwrap_or(u32::MAX))
    }

    fn register_output(&mut self, name: &str) -> Result<(Self::Output, String), PortError> {
        register(self.client(), name, jack::MidiOut::default())
    }

    fn register_input(&mut self, name: &str) -> Result<(Self::Input, String), PortError> {
        register(self.client(), name, jack::MidiIn::default())
    }

    fn activate(
        &mut self,
        processor: Processor<Self::Output, Self::Input>,
    ) -> Result<(), ActivationError> {
        match mem::take(&mut self.state) {
            State::Open(client) => {
                // the client is gone if this fails
                let active = client
                    .activate_async((), JackProcess(processor))
                    .map_err(|e| ActivationError::Rejected(e.to_string()))?;

                self.state = State::Active(active);

                Ok(())
            }
            State::Active(active) => {
                self.state = State::Active(active);
                Err(ActivationError::Rejected("already active".into()))
            }
            State::Closed => Err(ActivationError::Rejected("not connected".into())),
        }
    }

    fn deactivate(&mut self) -> Result<Processor<Self::Output, Self::Input>, ActivationError> {
        match mem::take(&mut self.state) {
            // blocks until the process callback has returned for good
            State::Active(active) => {
                let (client, (), JackProcess(processor)) = active
                    .deactivate()
                    .map_err(|e| ActivationError::Deactivation(e.to_string()))?;

                self.state = State::Open(client);

                Ok(processor)
            }
            state => {
                self.state = state;
                Err(ActivationError::Deactivation("not active".into()))
            }
        }
    }

    fn connect(&mut self, source: &str, destination: &str) -> bool {
        let Some(client) = self.client() else {
            return false;
        };

        let Err(e) = client.connect_ports_by_name(source, destination) else {
            return true;
        };

        // connecting twice fails, but leaves the ports connected
        let connected = client
            .port_by_name(source)
            .is_some_and(|port| port.is_connected_to(destination).unwrap_or(false));

        if !connected {
            log::warn!("failed to connect {source} to {destination}: {e}");
        }

        connected
    }

    fn disconnect(&mut self, source: &str, destination: &str) -> bool {
        let Some(client) = self.client() else {
            return false;
        };

        let Err(e) = client.disconnect_ports_by_name(source, destination) else {
            return true;
        };

        let disconnected = client
            .port_by_name(source)
            .is_some_and(|port| !port.is_connected_to(destination).unwrap_or(true));

        if !disconnected {
            log::warn!("failed to disconnect {source} from {destination}: {e}");
        }

        disconnected
    }
}
