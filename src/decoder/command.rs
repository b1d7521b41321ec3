/// Command line of the rtl_433 decoder process
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

pub const DEFAULT_DECODER: &str = "/usr/local/bin/rtl_433";

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderCommand {
    program: PathBuf,
    extra_args: Vec<String>,
    protocols: Vec<u32>,
}

impl DecoderCommand {
    pub fn new(program: impl Into<PathBuf>, protocols: &[u32]) -> Self {
        let mut protocols = protocols.to_vec();
        protocols.sort_unstable();
        protocols.dedup();

        Self {
            program: program.into(),
            extra_args: Vec::new(),
            protocols,
        }
    }

    /// Arguments placed before the JSON output flag, e.g. `-f 868M` or `-d 1`
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument list: extra arguments, `-F json`, then one `-R <id>` per protocol
    pub fn args(&self) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push("-F".to_string());
        args.push("json".to_string());
        for protocol in &self.protocols {
            args.push("-R".to_string());
            args.push(protocol.to_string());
        }
        args
    }

    /// Launch the decoder with both output streams captured
    ///
    /// The child is killed if its handle is dropped.
    pub fn spawn(&self) -> io::Result<Child> {
        Command::new(&self.program)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_filters_sorted() {
        let command = DecoderCommand::new(DEFAULT_DECODER, &[40, 19, 40, 3]);
        assert_eq!(
            command.args(),
            vec!["-F", "json", "-R", "3", "-R", "19", "-R", "40"]
        );
    }

    #[test]
    fn test_no_protocols() {
        let command = DecoderCommand::new(DEFAULT_DECODER, &[]);
        assert_eq!(command.args(), vec!["-F", "json"]);
    }

    #[test]
    fn test_extra_args_come_first() {
        let command = DecoderCommand::new(DEFAULT_DECODER, &[19])
            .with_extra_args(vec!["-f".to_string(), "868M".to_string()]);
        assert_eq!(command.args(), vec!["-f", "868M", "-F", "json", "-R", "19"]);
        assert_eq!(command.program(), Path::new(DEFAULT_DECODER));
    }
}
