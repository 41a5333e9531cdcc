//! Two-phase inscription pipeline.
//!
//! A commit transaction, signed by the wallet, funds a taproot address
//! whose only leaf is the inscription script. Once the commit is visible
//! to a data source, a reveal transaction spends it through that leaf with
//! a one-time key and lands each inscription on its own 546-sat output.
//!
//! Every step is recorded as an [`InscriptionState`]. A failure after the
//! commit broadcast carries a [`PendingReveal`] so the caller can finish
//! with [`InscriptionEngine::reveal_from_commit`] instead of paying for a
//! second commit.

pub mod commit;
pub mod envelope;
pub mod reveal;

pub use commit::{calculate_commit_cost, CommitCost, MAX_CONTENT_SIZE};
pub use envelope::{build_inscription_script, InscriptionContent, INSCRIPTION_POSTAGE};

use crate::builder::BuiltPsbt;
use crate::datasource::DataSourceManager;
use crate::network::NetworkType;
use crate::psbt::{finalize_signed_inputs, SignPsbtRequest, SignResult};
use crate::wallet::WalletAccount;
use crate::{LaserEyesError, Result};
use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::key::Keypair;
use bitcoin::secp256k1::{All, Secp256k1, SecretKey, Signing};
use bitcoin::{OutPoint, Txid};
use core::fmt;
use core::str::FromStr;
use once_cell::sync::Lazy;
use zeroize::{Zeroize, ZeroizeOnDrop};

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InscriptionState {
    Idle,
    CommitBuilding,
    CommitSigning,
    CommitBroadcasting,
    AwaitingCommitConfirmation,
    RevealBuilding,
    RevealBroadcasting,
    Done,
    Failed,
}

impl fmt::Display for InscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InscriptionState::Idle => "idle",
            InscriptionState::CommitBuilding => "commit building",
            InscriptionState::CommitSigning => "commit signing",
            InscriptionState::CommitBroadcasting => "commit broadcasting",
            InscriptionState::AwaitingCommitConfirmation => "commit confirmation",
            InscriptionState::RevealBuilding => "reveal building",
            InscriptionState::RevealBroadcasting => "reveal broadcasting",
            InscriptionState::Done => "done",
            InscriptionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Signs the commit PSBT. The client backs this with the connected wallet.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait PsbtSigner: Send + Sync {
    async fn sign_psbt(&self, request: SignPsbtRequest) -> Result<SignResult>;
}

/// One-time key controlling the commit output's script path. Wiped on drop
/// and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralKey {
    secret: [u8; 32],
}

impl EphemeralKey {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::new(&mut rand::thread_rng()).secret_bytes(),
        }
    }

    pub fn from_secret_bytes(secret: [u8; 32]) -> Result<Self> {
        SecretKey::from_slice(&secret)?;
        Ok(Self { secret })
    }

    pub fn keypair<C: Signing>(&self, secp: &Secp256k1<C>) -> Result<Keypair> {
        Ok(Keypair::from_seckey_slice(secp, &self.secret)?)
    }
}

impl fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EphemeralKey(..)")
    }
}

/// A broadcast commit whose reveal has not gone out yet.
#[derive(Debug, Clone)]
pub struct PendingReveal {
    pub commit_txid: String,
    pub key: EphemeralKey,
    pub contents: Vec<InscriptionContent>,
    pub ordinal_address: String,
    pub op_return: Option<String>,
    pub network: NetworkType,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InscribeOptions {
    /// sat/vB; the data sources' fast fee when unset.
    pub fee_rate: Option<f64>,
    /// Hex payload for an extra `OP_RETURN` reveal output.
    pub op_return: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InscriptionOutcome {
    pub commit_txid: String,
    pub reveal_txid: String,
    /// `<reveal txid>i<n>`, in content order.
    pub inscription_ids: Vec<String>,
    pub transitions: Vec<InscriptionState>,
}

struct Progress {
    transitions: Vec<InscriptionState>,
}

impl Progress {
    fn new() -> Self {
        Self {
            transitions: vec![InscriptionState::Idle],
        }
    }

    fn current(&self) -> InscriptionState {
        self.transitions.last().copied().unwrap_or(InscriptionState::Idle)
    }

    fn advance(&mut self, state: InscriptionState) {
        log::debug!("[InscriptionEngine] {} -> {}", self.current(), state);
        self.transitions.push(state);
    }

    fn fail(&mut self, source: LaserEyesError, pending: Option<&PendingReveal>) -> LaserEyesError {
        let phase = self.current();
        self.transitions.push(InscriptionState::Failed);
        log::warn!("[InscriptionEngine] Failed during {}: {}", phase, source);
        LaserEyesError::InscriptionFailed {
            phase,
            commit_txid: pending.map(|p| p.commit_txid.clone()),
            pending: pending.map(|p| Box::new(p.clone())),
            source: Box::new(source),
        }
    }
}

pub struct InscriptionEngine<'a> {
    data_sources: &'a DataSourceManager,
    signer: &'a dyn PsbtSigner,
    network: NetworkType,
}

impl<'a> InscriptionEngine<'a> {
    pub fn new(data_sources: &'a DataSourceManager, signer: &'a dyn PsbtSigner, network: NetworkType) -> Self {
        Self {
            data_sources,
            signer,
            network,
        }
    }

    /// Runs commit and reveal for `contents`, inscribing to the account's
    /// ordinals address and funding from its payment address.
    pub async fn inscribe(
        &self,
        account: &WalletAccount,
        contents: Vec<InscriptionContent>,
        options: InscribeOptions,
    ) -> Result<InscriptionOutcome> {
        let mut progress = Progress::new();

        progress.advance(InscriptionState::CommitBuilding);
        let key = EphemeralKey::generate();
        let commit = self
            .prepare_commit(account, &contents, &key, options.fee_rate)
            .await
            .map_err(|e| progress.fail(e, None))?;

        progress.advance(InscriptionState::CommitSigning);
        let request = SignPsbtRequest::new(commit.psbt).finalize(true).broadcast(false);
        let signed = self.signer.sign_psbt(request).await.map_err(|e| progress.fail(e, None))?;

        progress.advance(InscriptionState::CommitBroadcasting);
        let commit_txid = self.broadcast_commit(signed).await.map_err(|e| progress.fail(e, None))?;
        log::info!("[InscriptionEngine] Commit {} broadcast", commit_txid);

        let pending = PendingReveal {
            commit_txid,
            key,
            contents,
            ordinal_address: account.address.clone(),
            op_return: options.op_return,
            network: self.network,
        };
        self.complete_reveal(pending, progress).await
    }

    /// Finishes an inscription whose commit is already broadcast.
    pub async fn reveal_from_commit(&self, pending: PendingReveal) -> Result<InscriptionOutcome> {
        if pending.network != self.network {
            return Err(LaserEyesError::Config(format!(
                "pending reveal is for {}, engine runs on {}",
                pending.network, self.network
            )));
        }
        log::info!("[InscriptionEngine] Resuming reveal of commit {}", pending.commit_txid);
        self.complete_reveal(pending, Progress::new()).await
    }

    async fn prepare_commit(
        &self,
        account: &WalletAccount,
        contents: &[InscriptionContent],
        key: &EphemeralKey,
        fee_rate: Option<f64>,
    ) -> Result<BuiltPsbt> {
        let (utxos, fees) = futures::try_join!(
            self.data_sources.get_address_utxos(self.network, &account.payment_address, None),
            self.data_sources.get_recommended_fees(self.network, None),
        )?;
        let rate = fee_rate.unwrap_or(fees.fast_fee);
        let cost = calculate_commit_cost(contents, rate)?;

        let internal_key = key.keypair(&*SECP)?.x_only_public_key().0;
        let script = build_inscription_script(&internal_key, contents)?;
        let spend_info = commit::commit_spend_info(&*SECP, internal_key, &script)?;
        let address = commit::commit_address(self.network, &spend_info);
        log::info!(
            "[InscriptionEngine] Inscribing {} items ({} bytes) at {} sat/vB, {} sats required",
            contents.len(),
            cost.content_size,
            rate,
            cost.total
        );
        commit::build_commit_psbt(self.network, account, &address, &cost, utxos)
    }

    async fn broadcast_commit(&self, signed: SignResult) -> Result<String> {
        match signed {
            SignResult::Broadcast { txid, .. } => {
                log::info!("[InscriptionEngine] Wallet broadcast commit {}", txid);
                Ok(txid)
            }
            SignResult::Signed { psbt } => {
                let mut psbt = psbt.to_psbt()?;
                finalize_signed_inputs(&mut psbt)?;
                let tx = psbt.extract_tx_unchecked_fee_rate();
                self.data_sources
                    .broadcast_transaction(self.network, &serialize_hex(&tx), None)
                    .await
            }
        }
    }

    async fn complete_reveal(&self, pending: PendingReveal, mut progress: Progress) -> Result<InscriptionOutcome> {
        progress.advance(InscriptionState::AwaitingCommitConfirmation);
        let commit_value = match self.await_commit(&pending.commit_txid).await {
            Ok(value) => value,
            Err(e) => return Err(progress.fail(e, Some(&pending))),
        };

        progress.advance(InscriptionState::RevealBuilding);
        let reveal = match self.build_reveal(&pending, commit_value) {
            Ok(tx) => tx,
            Err(e) => return Err(progress.fail(e, Some(&pending))),
        };

        progress.advance(InscriptionState::RevealBroadcasting);
        let reveal_txid = match self
            .data_sources
            .broadcast_transaction(self.network, &serialize_hex(&reveal), None)
            .await
        {
            Ok(txid) => txid,
            Err(e) => return Err(progress.fail(e, Some(&pending))),
        };

        progress.advance(InscriptionState::Done);
        log::info!(
            "[InscriptionEngine] Revealed {} inscriptions in {}",
            pending.contents.len(),
            reveal_txid
        );
        Ok(InscriptionOutcome {
            inscription_ids: (0..pending.contents.len())
                .map(|n| format!("{reveal_txid}i{n}"))
                .collect(),
            commit_txid: pending.commit_txid.clone(),
            reveal_txid,
            transitions: progress.transitions,
        })
    }

    /// Waits for the commit and returns the value actually locked in its
    /// first output.
    async fn await_commit(&self, commit_txid: &str) -> Result<u64> {
        let timeout = || LaserEyesError::CommitConfirmationTimeout {
            commit_txid: commit_txid.to_string(),
        };
        if !self.data_sources.wait_for_transaction(self.network, commit_txid).await? {
            return Err(timeout());
        }
        self.data_sources
            .get_output_value_by_vout_index(self.network, commit_txid, 0)
            .await?
            .ok_or_else(timeout)
    }

    fn build_reveal(&self, pending: &PendingReveal, commit_value: u64) -> Result<bitcoin::Transaction> {
        let keypair = pending.key.keypair(&*SECP)?;
        let internal_key = keypair.x_only_public_key().0;
        let script = build_inscription_script(&internal_key, &pending.contents)?;
        let spend_info = commit::commit_spend_info(&*SECP, internal_key, &script)?;
        let ordinal_address = self.network.parse_address(&pending.ordinal_address)?;
        let params = reveal::RevealParams {
            commit_outpoint: OutPoint {
                txid: Txid::from_str(&pending.commit_txid)?,
                vout: 0,
            },
            commit_value,
            script: &script,
            spend_info: &spend_info,
            ordinal_address: &ordinal_address,
            inscription_count: pending.contents.len(),
            op_return: pending.op_return.as_deref(),
        };
        reveal::build_reveal_transaction(&*SECP, &keypair, &params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::PollSettings;
    use crate::mock::{funding_utxo, test_account, MockDataSource, MockSigner};
    use crate::types::{TransactionInfo, TxOutputInfo};
    use crate::LaserEyesErrorKind;
    use base64::Engine;
    use std::sync::Arc;
    use std::time::Duration;

    fn hello() -> InscriptionContent {
        InscriptionContent::new(base64::engine::general_purpose::STANDARD.encode("hello"), "text/plain")
    }

    fn source(auto_confirm: bool) -> MockDataSource {
        let account = test_account(NetworkType::Mainnet);
        let source = MockDataSource::new("mock").with_fees(5.0, 1.0).with_utxos(
            &account.payment_address,
            vec![funding_utxo(NetworkType::Mainnet, &account.payment_address, 100_000, 1)],
        );
        if auto_confirm {
            source.with_auto_confirm()
        } else {
            source
        }
    }

    fn manager(source: &MockDataSource) -> DataSourceManager {
        DataSourceManager::new()
            .with_source(Arc::new(source.clone()), 1)
            .with_poll_settings(PollSettings {
                interval: Duration::from_millis(100),
                timeout: Duration::from_millis(1_000),
            })
    }

    #[test]
    fn ephemeral_key_is_redacted() {
        let key = EphemeralKey::from_secret_bytes([3u8; 32]).unwrap();
        assert_eq!(format!("{key:?}"), "EphemeralKey(..)");
        assert!(EphemeralKey::from_secret_bytes([0u8; 32]).is_err());

        let pending = PendingReveal {
            commit_txid: "aa".repeat(32),
            key,
            contents: vec![InscriptionContent::new("aGk=", "text/plain")],
            ordinal_address: test_account(NetworkType::Mainnet).address,
            op_return: None,
            network: NetworkType::Mainnet,
        };
        assert!(!format!("{pending:?}").contains(&"03".repeat(32)));
    }

    #[tokio::test]
    async fn commit_and_reveal_are_broadcast_in_order() {
        let source = source(true);
        let manager = manager(&source);
        let signer = MockSigner::new();
        let account = test_account(NetworkType::Mainnet);
        let engine = InscriptionEngine::new(&manager, &signer, NetworkType::Mainnet);

        let outcome = engine
            .inscribe(&account, vec![hello(), hello()], InscribeOptions::default())
            .await
            .unwrap();

        assert_eq!(
            outcome.transitions,
            vec![
                InscriptionState::Idle,
                InscriptionState::CommitBuilding,
                InscriptionState::CommitSigning,
                InscriptionState::CommitBroadcasting,
                InscriptionState::AwaitingCommitConfirmation,
                InscriptionState::RevealBuilding,
                InscriptionState::RevealBroadcasting,
                InscriptionState::Done,
            ]
        );
        let broadcasts = source.broadcast_transactions();
        assert_eq!(broadcasts.len(), 2);
        let (commit, reveal) = (&broadcasts[0], &broadcasts[1]);
        assert_eq!(commit.compute_txid().to_string(), outcome.commit_txid);
        assert_eq!(reveal.input[0].previous_output.txid, commit.compute_txid());
        assert_eq!(reveal.output.len(), 2);
        assert_eq!(
            outcome.inscription_ids,
            vec![format!("{}i0", outcome.reveal_txid), format!("{}i1", outcome.reveal_txid)]
        );
        assert_eq!(signer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unseen_commit_times_out_and_can_be_resumed() {
        let source = source(false);
        let manager = manager(&source);
        let signer = MockSigner::new();
        let account = test_account(NetworkType::Mainnet);
        let engine = InscriptionEngine::new(&manager, &signer, NetworkType::Mainnet);

        let err = engine
            .inscribe(&account, vec![hello()], InscribeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), LaserEyesErrorKind::CommitConfirmationTimeout);
        let LaserEyesError::InscriptionFailed {
            phase,
            commit_txid,
            pending: Some(pending),
            ..
        } = err
        else {
            panic!("expected a failed inscription");
        };
        assert_eq!(phase, InscriptionState::AwaitingCommitConfirmation);
        assert_eq!(commit_txid.as_deref(), Some(pending.commit_txid.as_str()));
        assert_eq!(source.broadcasts().len(), 1);

        let commit = &source.broadcast_transactions()[0];
        source.insert_transaction(TransactionInfo {
            txid: pending.commit_txid.clone(),
            confirmed: false,
            block_height: None,
            outputs: commit
                .output
                .iter()
                .map(|o| TxOutputInfo {
                    value: o.value.to_sat(),
                    script_pub_key: hex::encode(o.script_pubkey.as_bytes()),
                    address: None,
                })
                .collect(),
        });

        let outcome = engine.reveal_from_commit(*pending).await.unwrap();
        assert_eq!(outcome.commit_txid, commit.compute_txid().to_string());
        assert_eq!(source.broadcasts().len(), 2);
        assert_eq!(signer.calls(), 1);
    }

    #[tokio::test]
    async fn commit_failures_carry_no_pending_reveal() {
        let account = test_account(NetworkType::Mainnet);
        let source = MockDataSource::new("mock").with_utxos(
            &account.payment_address,
            vec![funding_utxo(NetworkType::Mainnet, &account.payment_address, 2_000, 1)],
        );
        let manager = manager(&source);
        let signer = MockSigner::new();
        let engine = InscriptionEngine::new(&manager, &signer, NetworkType::Mainnet);

        let err = engine
            .inscribe(&account, vec![hello()], InscribeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), LaserEyesErrorKind::InsufficientFunds);
        assert!(err.commit_txid().is_none());
        assert!(matches!(
            err,
            LaserEyesError::InscriptionFailed {
                phase: InscriptionState::CommitBuilding,
                ..
            }
        ));
        assert_eq!(signer.calls(), 0);
    }
}
