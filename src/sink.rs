/// Error a sink may return for a single line. It is logged by the parser and never aborts a scan.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer of the lines extracted by `FollowParser`.
pub trait LineSink {
    /// Called once per line, in file order, without the trailing newline.
    fn parse(&mut self, line: &[u8]) -> Result<(), SinkError>;

    /// Called exactly once at the end of a successful invocation with the number of seconds elapsed since the
    /// position was last saved.
    fn finish(&mut self, idle_duration: f64);
}

impl<S: LineSink + ?Sized> LineSink for &mut S {
    fn parse(&mut self, line: &[u8]) -> Result<(), SinkError> {
        (**self).parse(line)
    }

    fn finish(&mut self, idle_duration: f64) {
        (**self).finish(idle_duration)
    }
}

impl<S: LineSink + ?Sized> LineSink for Box<S> {
    fn parse(&mut self, line: &[u8]) -> Result<(), SinkError> {
        (**self).parse(line)
    }

    fn finish(&mut self, idle_duration: f64) {
        (**self).finish(idle_duration)
    }
}

/// Sink that discards everything. Useful when only offsets need to move forward.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopSink;

impl LineSink for NoopSink {
    fn parse(&mut self, _line: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }

    fn finish(&mut self, _idle_duration: f64) {}
}
