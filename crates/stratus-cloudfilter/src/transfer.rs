//! Transfer responder: answers pending fetches with `CfExecute(TRANSFER_DATA)`.
//!
//! Each call is a single attempt. A key whose connection has been
//! disconnected is reported as [`TransferError::StaleKey`] without reaching
//! the OS; a stale-class status from the OS is reported the same way. Keys
//! not yet known to be open (a callback racing `connect`) go to the OS.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::api::CloudFilterApi;
use crate::connection::LiveConnections;
use crate::error::TransferError;
use crate::status::{self, PlatformStatus};
use crate::types::{ConnectionKey, TransferKey, TransferOperation};

/// The bridge's answer to a hydration request, owned so it can cross tasks.
#[derive(Debug, Clone)]
pub enum TransferCompletion {
    /// A data segment at an absolute offset; several may answer one request.
    Data {
        connection: ConnectionKey,
        transfer: TransferKey,
        offset: u64,
        data: Bytes,
    },
    /// Terminal failure for the transfer key.
    Failure {
        connection: ConnectionKey,
        transfer: TransferKey,
        offset: u64,
        status: PlatformStatus,
    },
}

#[derive(Clone)]
pub struct TransferResponder {
    api: Arc<dyn CloudFilterApi>,
    live: Arc<LiveConnections>,
}

impl TransferResponder {
    pub fn new(api: Arc<dyn CloudFilterApi>, live: Arc<LiveConnections>) -> Self {
        TransferResponder { api, live }
    }

    /// Hand `data` to the OS as the bytes at `offset`.
    pub fn complete(
        &self,
        connection: ConnectionKey,
        transfer: TransferKey,
        data: &[u8],
        offset: u64,
    ) -> Result<(), TransferError> {
        trace!(%connection, %transfer, offset, len = data.len(), "transfer data");
        let offset = platform_offset(connection, transfer, offset)?;
        self.execute(&TransferOperation::data(connection, transfer, data, offset))
    }

    /// Terminate the transfer with `status`; the reader sees an I/O error.
    ///
    /// A success status cannot fail a transfer, so `0` is replaced with
    /// `STATUS_UNSUCCESSFUL`.
    pub fn fail(
        &self,
        connection: ConnectionKey,
        transfer: TransferKey,
        offset: u64,
        status: PlatformStatus,
    ) -> Result<(), TransferError> {
        let status = if status.is_success() {
            warn!(%connection, %transfer, %status, "failing a transfer with a success status");
            status::STATUS_UNSUCCESSFUL
        } else {
            status
        };
        trace!(%connection, %transfer, offset, %status, "transfer failure");
        let offset = platform_offset(connection, transfer, offset)?;
        self.execute(&TransferOperation::failure(connection, transfer, offset, status))
    }

    pub fn deliver(&self, completion: &TransferCompletion) -> Result<(), TransferError> {
        match completion {
            TransferCompletion::Data {
                connection,
                transfer,
                offset,
                data,
            } => self.complete(*connection, *transfer, data, *offset),
            TransferCompletion::Failure {
                connection,
                transfer,
                offset,
                status,
            } => self.fail(*connection, *transfer, *offset, *status),
        }
    }

    fn execute(&self, operation: &TransferOperation<'_>) -> Result<(), TransferError> {
        let connection = operation.connection;
        let transfer = operation.transfer;
        if self.live.is_closed(connection) {
            return Err(TransferError::StaleKey {
                connection,
                transfer,
                status: None,
            });
        }

        self.api.execute_transfer(operation).map_err(|status| {
            if status.is_stale_key() {
                TransferError::StaleKey {
                    connection,
                    transfer,
                    status: Some(status),
                }
            } else {
                TransferError::Rejected {
                    connection,
                    transfer,
                    status,
                }
            }
        })
    }
}

/// File offsets are signed 64-bit on the platform.
fn platform_offset(connection: ConnectionKey, transfer: TransferKey, offset: u64) -> Result<i64, TransferError> {
    i64::try_from(offset).map_err(|_| TransferError::Rejected {
        connection,
        transfer,
        status: status::E_INVALIDARG,
    })
}
