//! Writer selection

use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::WriterConfig;

/// Build the boxed writer for a [`WriterConfig`].
pub(crate) fn make_writer(config: WriterConfig) -> BoxMakeWriter {
    match config {
        WriterConfig::Stderr => BoxMakeWriter::new(std::io::stderr),
        WriterConfig::Stdout => BoxMakeWriter::new(std::io::stdout),
    }
}
