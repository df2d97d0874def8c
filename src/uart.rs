// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use arrayvec::ArrayVec;

/// I/O port bases of the four legacy COM ports a domain may have emulated.
pub const COM_PORTS: [u16; 4] = [0x3F8, 0x2F8, 0x3E8, 0x2E8];

/// Bytes of emulated UART output kept per domain; older output is discarded first.
pub const UART_BUFFER_SIZE: usize = 0x4000;

/// How a domain's serial console is provided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UartAssignment {
    /// No console. All four COM ports are still trapped so that probing them is harmless.
    None,
    /// One of `COM_PORTS`, emulated by the hypervisor with its output captured.
    Emulated(u16),
    /// A host UART handed directly to the domain.
    PassThrough(u16),
}

/// Serial console state of a domain.
#[derive(Debug, Default)]
pub struct UartState {
    port: Option<u16>,
    pt_port: Option<u16>,
    output: ArrayVec<u8, UART_BUFFER_SIZE>,
}

impl UartState {
    /// Selects the emulated COM port. Returns false if `port` isn't a legacy COM port.
    pub fn set_port(&mut self, port: u16) -> bool {
        if !COM_PORTS.contains(&port) {
            return false;
        }
        self.port = Some(port);
        true
    }

    /// Selects a host port to pass through; this takes precedence over any emulated port.
    pub fn set_pt_port(&mut self, port: u16) {
        self.pt_port = Some(port);
    }

    pub fn assignment(&self) -> UartAssignment {
        match (self.pt_port, self.port) {
            (Some(pt), _) => UartAssignment::PassThrough(pt),
            (None, Some(port)) => UartAssignment::Emulated(port),
            (None, None) => UartAssignment::None,
        }
    }

    /// Captures bytes the domain wrote to its emulated port. Returns the number of bytes
    /// accepted, which is zero unless a port is being emulated.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if !matches!(self.assignment(), UartAssignment::Emulated(_)) {
            return 0;
        }
        let keep = &bytes[bytes.len().saturating_sub(UART_BUFFER_SIZE)..];
        let overflow = (self.output.len() + keep.len()).saturating_sub(UART_BUFFER_SIZE);
        self.output.drain(..overflow);
        // Can't fail, room was made above.
        let _ = self.output.try_extend_from_slice(keep);
        bytes.len()
    }

    /// Copies the oldest captured output into `buf`, returning the number of bytes copied.
    /// Passed-through UARTs have nothing to dump.
    pub fn dump(&self, buf: &mut [u8]) -> usize {
        if !matches!(self.assignment(), UartAssignment::Emulated(_)) {
            return 0;
        }
        let len = buf.len().min(self.output.len());
        buf[..len].copy_from_slice(&self.output[..len]);
        len
    }
}
