//! Shared test doubles for the pipeline collaborator ports.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use certon_core::{
    CertificateId, ContractAddress, PlanLimits, TenantId, TenantTransferSettings, TokenId, TxHash,
    WalletAddress,
};

use crate::error::PipelineError;
use crate::ports::{
    CertificateEvent, CustodyLedger, LedgerError, LedgerMintReceipt, MintRequest, MintStatus,
    NotificationSink, PlanService, ReceiptStatus, SettingsProvider, TransferReceipt,
    TransferRequest,
};

pub(crate) const WALLET: &str = "0xb9c5714089478a327f09197987f16f9e5d936e8a";

pub(crate) fn wallet() -> WalletAddress {
    WalletAddress::new(WALLET).unwrap()
}

/// A ledger whose responses are scripted per call, in order. When a script
/// queue is empty the call succeeds with a generated receipt, so tests only
/// script the interesting calls.
#[derive(Default)]
pub(crate) struct ScriptedLedger {
    mints: Mutex<VecDeque<Result<LedgerMintReceipt, LedgerError>>>,
    transfers: Mutex<VecDeque<Result<TransferReceipt, LedgerError>>>,
    receipts: Mutex<VecDeque<Result<ReceiptStatus, LedgerError>>>,
    statuses: Mutex<VecDeque<Result<MintStatus, LedgerError>>>,
    pub mint_calls: AtomicU32,
    pub transfer_calls: AtomicU32,
    pub receipt_calls: AtomicU32,
    pub status_calls: AtomicU32,
}

impl ScriptedLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_mint(&self, result: Result<LedgerMintReceipt, LedgerError>) {
        self.mints.lock().push_back(result);
    }

    pub fn script_transfer(&self, result: Result<TransferReceipt, LedgerError>) {
        self.transfers.lock().push_back(result);
    }

    pub fn script_receipt(&self, result: Result<ReceiptStatus, LedgerError>) {
        self.receipts.lock().push_back(result);
    }

    pub fn script_status(&self, result: Result<MintStatus, LedgerError>) {
        self.statuses.lock().push_back(result);
    }
}

pub(crate) fn mint_receipt(n: u32) -> LedgerMintReceipt {
    LedgerMintReceipt {
        token_id: TokenId::new(format!("tok-{n}")).unwrap(),
        tx_hash: TxHash::new(format!("0xmint{n:04}")).unwrap(),
        contract_address: ContractAddress::new("0xc0ffee254729296a45a3885639ac7e10f9d54979")
            .unwrap(),
    }
}

#[async_trait]
impl CustodyLedger for ScriptedLedger {
    async fn mint(&self, _request: &MintRequest) -> Result<LedgerMintReceipt, LedgerError> {
        let n = self.mint_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.mints.lock().pop_front() {
            Some(result) => result,
            None => Ok(mint_receipt(n)),
        }
    }

    async fn transfer(&self, _request: &TransferRequest) -> Result<TransferReceipt, LedgerError> {
        let n = self.transfer_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.transfers.lock().pop_front() {
            Some(result) => result,
            None => Ok(TransferReceipt {
                tx_hash: TxHash::new(format!("0xxfer{n:04}")).unwrap(),
            }),
        }
    }

    async fn query_receipt(&self, _tx_hash: &TxHash) -> Result<ReceiptStatus, LedgerError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        match self.receipts.lock().pop_front() {
            Some(result) => result,
            None => Ok(ReceiptStatus::Confirmed),
        }
    }

    async fn mint_status(&self, _certificate_id: CertificateId) -> Result<MintStatus, LedgerError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().pop_front() {
            Some(result) => result,
            None => Ok(MintStatus::Unknown),
        }
    }

    async fn balance(&self, _address: &WalletAddress) -> Result<u64, LedgerError> {
        Ok(0)
    }
}

/// A plan service answering the same limits for every tenant.
pub(crate) struct FixedPlans(pub PlanLimits);

#[async_trait]
impl PlanService for FixedPlans {
    async fn limits(&self, _tenant_id: TenantId) -> Result<PlanLimits, PipelineError> {
        Ok(self.0)
    }
}

/// A settings provider answering one settings snapshot, replaceable
/// mid-test through [`FixedSettings::set`].
pub(crate) struct FixedSettings(Mutex<TenantTransferSettings>);

impl FixedSettings {
    pub fn new(settings: TenantTransferSettings) -> Arc<Self> {
        Arc::new(Self(Mutex::new(settings)))
    }

    /// Defaults: auto transfer off, no wallet.
    pub fn manual() -> Arc<Self> {
        Self::new(TenantTransferSettings::default())
    }

    /// Auto transfer on with a verified wallet and no cooldown.
    pub fn auto() -> Arc<Self> {
        Self::new(TenantTransferSettings {
            auto_transfer_enabled: true,
            brand_wallet: Some(wallet()),
            wallet_verified: true,
            cooldown_secs: 0,
            ..TenantTransferSettings::default()
        })
    }

    pub fn set(&self, settings: TenantTransferSettings) {
        *self.0.lock() = settings;
    }

    pub fn snapshot(&self) -> TenantTransferSettings {
        self.0.lock().clone()
    }
}

#[async_trait]
impl SettingsProvider for FixedSettings {
    async fn transfer_settings(
        &self,
        _tenant_id: TenantId,
    ) -> Result<TenantTransferSettings, PipelineError> {
        Ok(self.0.lock().clone())
    }
}

/// A sink that records every published event for assertion.
#[derive(Default)]
pub(crate) struct RecordingSink(Mutex<Vec<CertificateEvent>>);

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CertificateEvent> {
        self.0.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, event: CertificateEvent) {
        self.0.lock().push(event);
    }
}
