//! Owned NFT discovery
//!
//! Lists the NFTs a wallet holds: token accounts owned by the wallet, narrowed to
//! single-unit holdings with a Metaplex metadata account. The holdings can be
//! narrowed further to a verified collection or a verified creator.

use super::{AssetId, ChainProvider, RpcError};

use async_trait::async_trait;
use mpl_token_metadata::accounts::Metadata;
use mpl_token_metadata::types::{Collection, Creator};
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use spl_token::state::Account as TokenAccount;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// `getMultipleAccounts` accepts at most this many keys per request
const MULTIPLE_ACCOUNTS_LIMIT: usize = 100;

/// Which of the owner's NFTs a run approves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryFilter {
    /// Members of this verified collection
    Collection(Pubkey),
    /// NFTs listing this address as a verified creator
    Creator(Pubkey),
    /// Every NFT the owner holds
    Owner,
}

impl DiscoveryFilter {
    pub fn accepts(&self, metadata: &Metadata) -> bool {
        self.accepts_parts(metadata.collection.as_ref(), metadata.creators.as_deref())
    }

    fn accepts_parts(&self, member_of: Option<&Collection>, creators: Option<&[Creator]>) -> bool {
        match self {
            DiscoveryFilter::Collection(collection) => is_verified_member(member_of, collection),
            DiscoveryFilter::Creator(creator) => is_verified_creator(creators, creator),
            DiscoveryFilter::Owner => true,
        }
    }
}

impl fmt::Display for DiscoveryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryFilter::Collection(collection) => write!(f, "collection {}", collection),
            DiscoveryFilter::Creator(creator) => write!(f, "creator {}", creator),
            DiscoveryFilter::Owner => write!(f, "all holdings"),
        }
    }
}

/// Upstream source of asset ids for a run
#[async_trait]
pub trait AssetDiscovery: Send + Sync {
    /// Mints held by `owner` whose metadata passes `filter`
    async fn list_owned_assets(
        &self,
        owner: &Pubkey,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<AssetId>, RpcError>;

    /// Mints held by `owner` whose metadata names `collection` as a verified collection
    async fn list_owned_asset_ids(
        &self,
        owner: &Pubkey,
        collection: &Pubkey,
    ) -> Result<Vec<AssetId>, RpcError> {
        self.list_owned_assets(owner, &DiscoveryFilter::Collection(*collection))
            .await
    }
}

/// Address of the Metaplex metadata account for `mint`
pub fn metadata_address(mint: &Pubkey) -> Pubkey {
    let program_id = Pubkey::new_from_array(mpl_token_metadata::ID.to_bytes());
    Pubkey::find_program_address(
        &[b"metadata", program_id.as_ref(), mint.as_ref()],
        &program_id,
    )
    .0
}

/// Token account holds exactly one unit for `owner`
pub fn holds_single_unit(account: &TokenAccount, owner: &Pubkey) -> bool {
    account.owner == *owner && account.amount == 1
}

/// Metadata collection field names `collection` and the collection authority has verified it
pub fn is_verified_member(member_of: Option<&Collection>, collection: &Pubkey) -> bool {
    member_of
        .map(|c| c.verified && c.key.to_bytes() == collection.to_bytes())
        .unwrap_or(false)
}

/// A verified entry in the metadata creators list is `creator`
pub fn is_verified_creator(creators: Option<&[Creator]>, creator: &Pubkey) -> bool {
    creators
        .unwrap_or_default()
        .iter()
        .any(|c| c.verified && c.address.to_bytes() == creator.to_bytes())
}

impl ChainProvider {
    async fn fetch_account_data(&self, keys: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>, RpcError> {
        let mut data = Vec::with_capacity(keys.len());
        for page in keys.chunks(MULTIPLE_ACCOUNTS_LIMIT) {
            let accounts = self
                .http()
                .get_multiple_accounts(page)
                .await
                .map_err(RpcError::from)?;
            data.extend(accounts.into_iter().map(|a| a.map(|a| a.data)));
        }
        Ok(data)
    }
}

#[async_trait]
impl AssetDiscovery for ChainProvider {
    async fn list_owned_assets(
        &self,
        owner: &Pubkey,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<AssetId>, RpcError> {
        let keyed = self
            .http()
            .get_token_accounts_by_owner(owner, TokenAccountsFilter::ProgramId(spl_token::id()))
            .await
            .map_err(RpcError::from)?;

        let token_accounts: Vec<Pubkey> = keyed
            .iter()
            .filter_map(|k| Pubkey::from_str(&k.pubkey).ok())
            .collect();
        debug!("Owner {} has {} token accounts", owner, token_accounts.len());

        let mints: Vec<Pubkey> = self
            .fetch_account_data(&token_accounts)
            .await?
            .into_iter()
            .flatten()
            .filter_map(|data| TokenAccount::unpack(&data).ok())
            .filter(|account| holds_single_unit(account, owner))
            .map(|account| account.mint)
            .collect();

        let metadata_keys: Vec<Pubkey> = mints.iter().map(metadata_address).collect();
        let metadata = self.fetch_account_data(&metadata_keys).await?;

        let assets: Vec<AssetId> = mints
            .iter()
            .zip(metadata)
            .filter_map(|(mint, data)| {
                let metadata = Metadata::from_bytes(&data?).ok()?;
                filter.accepts(&metadata).then(|| AssetId::new(*mint))
            })
            .collect();

        info!(
            "Found {} of {} single-unit holdings matching {}",
            assets.len(),
            mints.len(),
            filter
        );

        Ok(assets)
    }
}
