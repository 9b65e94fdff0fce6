use crate::sched::{self, BlockIo, EventWriter, InputEvent, Processor, WriteError};

/// One JACK process cycle, as seen by the scheduler.
pub struct JackBlock<'a> {
    scope: &'a jack::ProcessScope,
}

impl<'a> JackBlock<'a> {
    #[inline(always)]
    pub fn new(scope: &'a jack::ProcessScope) -> Self {
        Self { scope }
    }
}

pub struct JackWriter<'a>(jack::MidiWriter<'a>);

#[inline]
fn write_error(e: jack::Error) -> WriteError {
    match e {
        jack::Error::NotEnoughSpace => WriteError::NoSpace,
        _ => WriteError::Rejected,
    }
}

impl EventWriter for JackWriter<'_> {
    #[inline]
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), WriteError> {
        self.0
            .write(&jack::RawMidi {
                time: offset,
                bytes,
            })
            .map_err(write_error)
    }
}

impl BlockIo for JackBlock<'_> {
    type Output = jack::Port<jack::MidiOut>;
    type Input = jack::Port<jack::MidiIn>;
    type Writer<'b>
        = JackWriter<'b>
    where
        Self: 'b;

    #[inline(always)]
    fn n_frames(&self) -> u32 {
        self.scope.n_frames()
    }

    #[inline]
    fn output_buffer<'b>(&'b self, port: &'b mut Self::Output) -> Option<JackWriter<'b>> {
        // also clears whatever the buffer held from the previous cycle
        Some(JackWriter(port.writer(self.scope)))
    }

    #[inline]
    fn read_input(
        &self,
        port: &Self::Input,
        mut on_event: impl FnMut(InputEvent<'_>),
    ) -> Result<(), sched::BufferUnavailable> {
        for event in port.iter(self.scope) {
            on_event(InputEvent {
                offset: event.time,
                bytes: event.bytes,
            });
        }

        Ok(())
    }
}

/// Runs a [`Processor`] from JACK's process callback.
pub struct JackProcess(pub Processor<jack::Port<jack::MidiOut>, jack::Port<jack::MidiIn>>);

impl jack::ProcessHandler for JackProcess {
    #[inline]
    fn process(&mut self, _client: &jack::Client, scope: &jack::ProcessScope) -> jack::Control {
        self.0.process(&JackBlock::new(scope));
        jack::Control::Continue
    }
}
