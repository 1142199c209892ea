//! RFID reader over a serial device node
//!
//! The reader reports one tag per line. Line framing is all this module
//! understands; the payload is logged verbatim.

use crate::capture::traits::{TagRead, TagSource};
use crate::utils::error::DeviceError;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};

/// Tag source reading newline-delimited reports from a device node
pub struct SerialTagSource {
    endpoint: String,
    reader: Option<BufReader<File>>,
    line: String,
}

impl SerialTagSource {
    /// Open the device. A failed open is logged and retried on the next read.
    pub fn open(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let reader = match open_device(&endpoint) {
            Ok(reader) => {
                tracing::info!("Opened RFID reader {}", endpoint);
                Some(reader)
            }
            Err(e) => {
                tracing::error!("{}", e);
                None
            }
        };

        Self {
            endpoint,
            reader,
            line: String::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

impl TagSource for SerialTagSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn read_tag(&mut self) -> Result<Option<TagRead>, DeviceError> {
        if self.reader.is_none() {
            self.reader = Some(open_device(&self.endpoint)?);
            tracing::info!("Reopened RFID reader {}", self.endpoint);
        }

        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        self.line.clear();
        match reader.read_line(&mut self.line) {
            // End of stream: the device hung up or went away
            Ok(0) => {
                self.reader = None;
                Err(DeviceError::Disconnected(self.endpoint.clone()))
            }
            Ok(_) => {
                let payload = self.line.trim();
                if payload.is_empty() {
                    return Ok(None);
                }
                Ok(Some(TagRead {
                    timestamp: Local::now(),
                    payload: payload.to_string(),
                }))
            }
            Err(e) => {
                self.reader = None;
                Err(DeviceError::Read {
                    endpoint: self.endpoint.clone(),
                    source: e,
                })
            }
        }
    }

    fn release(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!("Released RFID reader {}", self.endpoint);
        }
    }
}

fn open_device(endpoint: &str) -> Result<BufReader<File>, DeviceError> {
    OpenOptions::new()
        .read(true)
        .open(endpoint)
        .map(BufReader::new)
        .map_err(|e| DeviceError::Open {
            endpoint: endpoint.to_string(),
            source: e,
        })
}
