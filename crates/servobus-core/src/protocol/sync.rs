//! Broadcast coordinator
//!
//! SYNC_WRITE packs one record per device into a single broadcast packet and
//! is never answered. SYNC_READ is one broadcast request after which every
//! listed device answers on its own, in the order the addresses were given.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::bus::check_unicast;
use super::packet::{read_frame_body, read_frame_head};
use super::{
    Bus, ByteTransport, Instruction, Packet, ProtocolError, ResponseField, BROADCAST_ADDRESS,
    MAX_PARAMS,
};

impl<T: ByteTransport> Bus<T> {
    /// Write one equally sized record per device in a single broadcast packet
    ///
    /// Parameters are `[register, record_len, (address, record)*]`. Nothing
    /// is written unless every check passes.
    pub fn sync_write<P: AsRef<[u8]>>(
        &mut self,
        addresses: &[u8],
        register: u8,
        payloads: &[P],
    ) -> Result<(), ProtocolError> {
        if addresses.is_empty() {
            return Err(ProtocolError::ArityMismatch(
                "sync write needs at least one device".to_string(),
            ));
        }
        if addresses.len() != payloads.len() {
            return Err(ProtocolError::ArityMismatch(format!(
                "{} devices but {} payloads",
                addresses.len(),
                payloads.len()
            )));
        }

        let record_len = payloads[0].as_ref().len();
        if record_len == 0 {
            return Err(ProtocolError::ArityMismatch(
                "sync write records are empty".to_string(),
            ));
        }
        if let Some((i, p)) = payloads
            .iter()
            .enumerate()
            .find(|(_, p)| p.as_ref().len() != record_len)
        {
            return Err(ProtocolError::ArityMismatch(format!(
                "payload {} is {} bytes, expected {}",
                i,
                p.as_ref().len(),
                record_len
            )));
        }
        for &address in addresses {
            check_unicast(address)?;
        }

        let param_len = 2 + addresses.len() * (record_len + 1);
        if param_len > MAX_PARAMS {
            return Err(ProtocolError::PacketTooLarge { len: param_len });
        }

        let mut params = Vec::with_capacity(param_len);
        params.push(register);
        params.push(record_len as u8);
        for (&address, payload) in addresses.iter().zip(payloads) {
            params.push(address);
            params.extend_from_slice(payload.as_ref());
        }

        let packet = Packet::new(BROADCAST_ADDRESS, Instruction::SyncWrite, params);
        self.transmit(&packet)
    }

    /// Read `length` bytes at `register` from several devices with one request
    ///
    /// Devices that fail are logged and left out of the result. The call
    /// fails only if no device answered, with the last failure seen.
    pub fn sync_read(
        &mut self,
        addresses: &[u8],
        register: u8,
        length: u8,
    ) -> Result<BTreeMap<u8, Vec<u8>>, ProtocolError> {
        if addresses.is_empty() {
            return Err(ProtocolError::ArityMismatch(
                "sync read needs at least one device".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for &address in addresses {
            check_unicast(address)?;
            if !seen.insert(address) {
                return Err(ProtocolError::ArityMismatch(format!(
                    "device {} listed twice",
                    address
                )));
            }
        }
        if length == 0 {
            return Err(ProtocolError::range("sync read length", 0, 1, u8::MAX as i64));
        }
        if 2 + addresses.len() > MAX_PARAMS {
            return Err(ProtocolError::PacketTooLarge {
                len: 2 + addresses.len(),
            });
        }

        let mut params = Vec::with_capacity(2 + addresses.len());
        params.push(register);
        params.push(length);
        params.extend_from_slice(addresses);

        self.transport_mut().clear_input()?;
        let packet = Packet::new(BROADCAST_ADDRESS, Instruction::SyncRead, params);
        self.transmit(&packet)?;

        let mut results = BTreeMap::new();
        let mut last_error = None;
        let mut next = 0;

        while next < addresses.len() {
            let expected = addresses[next];
            let pending = &addresses[next..];

            // A device that stayed silent is detected when the next one in
            // line starts answering
            let outcome = self.receive_frame(|reader| {
                let got = read_frame_head(reader)?;
                if !pending.contains(&got) {
                    return Err(ProtocolError::AddressMismatch { expected, got });
                }
                read_frame_body(reader, got)
            });

            match outcome {
                Ok(response) => {
                    let skip = pending
                        .iter()
                        .position(|&a| a == response.address)
                        .unwrap_or(0);
                    for &silent in &pending[..skip] {
                        warn!(device = silent, "no sync read response");
                        last_error = Some(ProtocolError::AddressMismatch {
                            expected: silent,
                            got: response.address,
                        });
                    }

                    if response.params.len() == length as usize {
                        results.insert(response.address, response.params);
                    } else {
                        warn!(
                            device = response.address,
                            got = response.params.len(),
                            expected = length,
                            "sync read returned wrong number of bytes"
                        );
                        last_error = Some(ProtocolError::ResponseLength {
                            expected: length as usize,
                            got: response.params.len(),
                        });
                    }
                    next += skip + 1;
                }
                Err(e) => {
                    warn!(device = expected, code = e.code(), "sync read failed: {}", e);
                    last_error = Some(e);
                    next += 1;
                }
            }
        }

        debug!(
            requested = addresses.len(),
            answered = results.len(),
            "sync read complete"
        );

        if results.is_empty() {
            return Err(last_error.unwrap_or(ProtocolError::Timeout {
                during: ResponseField::HeaderFirst,
            }));
        }
        Ok(results)
    }
}
