//! Transaction semantics against the store: per-variant validation and
//! tentative execution. Dispatch is keyed on the transaction tag.

use chain::{Detail, Transaction, ValidationError};
use crypto::MinerId;
use storage::{Miner, SideStore, StoreWriter, User};

/// Balance granted to the founding user by the init transaction.
pub const FIRST_USER_BALANCE: u64 = 990_000_000_000_000_000;

/// Stake granted to the founding miner by the init transaction.
pub const FIRST_USER_STAKE: u64 = 10_000_000_000_000_000;

/// Maximum length of a storage entry value.
pub const STORAGE_ENTRY_MAX_VALUE_LENGTH: usize = 65000;

/// Validates a transaction against the (unconfirmed) store state. Does not
/// touch signatures, which are verified separately by the crypto pool.
pub fn validate_transaction<S>(
    transaction: &Transaction,
    block_id: u32,
    store: &S,
) -> Result<(), ValidationError>
where
    S: SideStore + ?Sized,
{
    match *transaction.detail() {
        Detail::Init { .. } => {
            // only ever valid as the first transaction of block 1
            if block_id != 1 || store.users_count() != 0 {
                return Err(ValidationError::UnexpectedManagement);
            }
            Ok(())
        }
        Detail::Commit {
            ref miner,
            pricing,
            users,
            tokens,
            staked_tokens,
            ..
        } => {
            let miner = store
                .miner(miner)
                .ok_or(ValidationError::InvalidMiner)?;
            if miner.owner != transaction.user_id() {
                return Err(ValidationError::InvalidMiner);
            }
            // recorded statistics must match the state the reward is
            // committed on
            if pricing != store.pricing()
                || users != store.users_count()
                || tokens != store.tokens()
                || staked_tokens != store.staked_tokens()
            {
                return Err(ValidationError::InvalidStatistics);
            }
            Ok(())
        }
        Detail::Transfer { ref to, amount } => {
            let user = store
                .user(&transaction.user_id())
                .ok_or(ValidationError::UnknownUser)?;
            if *to != transaction.user_id() && store.user(to).is_none() {
                return Err(ValidationError::UnknownUser);
            }
            let charge = amount
                .checked_add(transaction.fee())
                .ok_or(ValidationError::InsufficientFunds)?;
            if user.balance < charge {
                return Err(ValidationError::InsufficientFunds);
            }
            Ok(())
        }
        Detail::StorageEntry { ref key, ref value } => {
            let user = store
                .user(&transaction.user_id())
                .ok_or(ValidationError::UnknownUser)?;
            if user.balance < transaction.fee() {
                return Err(ValidationError::InsufficientFunds);
            }
            if key.is_empty() || value.len() > STORAGE_ENTRY_MAX_VALUE_LENGTH {
                return Err(ValidationError::InvalidStorageEntry);
            }
            // entries are immutable once written
            if store.storage_entry(key).is_some() {
                return Err(ValidationError::InvalidStorageEntry);
            }
            Ok(())
        }
        Detail::CreateMiner { ref miner, stake } => {
            let user = store
                .user(&transaction.user_id())
                .ok_or(ValidationError::UnknownUser)?;
            if stake == 0 || store.miner(miner).is_some() {
                return Err(ValidationError::InvalidMiner);
            }
            let charge = stake
                .checked_add(transaction.fee())
                .ok_or(ValidationError::InsufficientFunds)?;
            if user.balance < charge {
                return Err(ValidationError::InsufficientFunds);
            }
            Ok(())
        }
    }
}

/// Applies a validated transaction to the unconfirmed store. Fees are
/// burned.
pub fn execute_transaction(transaction: &Transaction, _block_id: u32, store: &dyn StoreWriter) {
    match *transaction.detail() {
        Detail::Init { .. } => {
            let user_id = transaction.user_id();
            let key = *transaction.public_key();
            store.set_user(User::new(user_id, key, FIRST_USER_BALANCE));
            store.set_miner(Miner::new(
                MinerId::from(&key),
                user_id,
                FIRST_USER_STAKE,
            ));
        }
        Detail::Commit { .. } => {
            // miner reward, paid to the miner's owner
            let mut owner = store
                .user(&transaction.user_id())
                .expect("commit was validated; qed");
            owner.balance += store.pricing();
            store.set_user(owner);
        }
        Detail::Transfer { ref to, amount } => {
            let mut sender = store
                .user(&transaction.user_id())
                .expect("transfer was validated; qed");
            sender.balance -= amount + transaction.fee();
            if *to == sender.id {
                sender.balance += amount;
                store.set_user(sender);
            } else {
                store.set_user(sender);
                let mut receiver = store.user(to).expect("transfer was validated; qed");
                receiver.balance += amount;
                store.set_user(receiver);
            }
        }
        Detail::StorageEntry { ref key, ref value } => {
            let mut user = store
                .user(&transaction.user_id())
                .expect("storage entry was validated; qed");
            user.balance -= transaction.fee();
            store.set_user(user);
            store.set_storage_entry(key.clone(), value.clone(), transaction.id());
        }
        Detail::CreateMiner { ref miner, stake } => {
            let mut user = store
                .user(&transaction.user_id())
                .expect("create miner was validated; qed");
            user.balance -= stake + transaction.fee();
            let owner = user.id;
            store.set_user(user);
            store.set_miner(Miner::new(*miner, owner, stake));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{execute_transaction, validate_transaction, FIRST_USER_BALANCE};
    use chain::{Detail, Transaction, ValidationError};
    use db::MemoryDatabase;
    use storage::Store;
    use test_data::ChainBuilder;

    fn initialized_store() -> (ChainBuilder, MemoryDatabase) {
        let builder = ChainBuilder::new();
        let db = MemoryDatabase::default();
        let init = builder.init_transaction();
        assert!(validate_transaction(&init, 1, db.unconfirmed()).is_ok());
        execute_transaction(&init, 1, db.unconfirmed());
        (builder, db)
    }

    #[test]
    fn test_init_creates_user_and_miner() {
        let (builder, db) = initialized_store();
        let user = db.unconfirmed().user(&builder.user_id()).unwrap();
        assert_eq!(user.balance, FIRST_USER_BALANCE);
        assert!(db.unconfirmed().miner(&builder.miner_id()).is_some());
    }

    #[test]
    fn test_init_is_rejected_later() {
        let (builder, db) = initialized_store();
        let init = builder.init_transaction();
        assert_eq!(
            validate_transaction(&init, 2, db.unconfirmed()),
            Err(ValidationError::UnexpectedManagement)
        );
    }

    #[test]
    fn test_transfer_charges_fee() {
        let (builder, db) = initialized_store();
        let transfer = builder.transfer(2, 1000);
        assert!(validate_transaction(&transfer, 2, db.unconfirmed()).is_ok());
        execute_transaction(&transfer, 2, db.unconfirmed());

        let user = db.unconfirmed().user(&builder.user_id()).unwrap();
        // self transfer, only the fee is burned
        assert_eq!(user.balance, FIRST_USER_BALANCE - transfer.fee());
    }

    #[test]
    fn test_transfer_to_unknown_user() {
        let (builder, db) = initialized_store();
        let other = ChainBuilder::new().with_key(crypto_key(b"other"));
        let transaction = Transaction::signed(
            2,
            Detail::Transfer {
                to: other.user_id(),
                amount: 1,
            },
            builder.key(),
        );
        assert_eq!(
            validate_transaction(&transaction, 2, db.unconfirmed()),
            Err(ValidationError::UnknownUser)
        );
    }

    fn crypto_key(seed: &[u8]) -> ::crypto::SecretKey {
        ::crypto::SecretKey::from_seed(seed)
    }

    #[test]
    fn test_storage_entry_is_immutable() {
        let (builder, db) = initialized_store();
        let entry = builder.storage_entry(2, b"key-1", 128);
        assert!(validate_transaction(&entry, 2, db.unconfirmed()).is_ok());
        execute_transaction(&entry, 2, db.unconfirmed());

        let duplicate = builder.storage_entry(2, b"key-1", 64);
        assert_eq!(
            validate_transaction(&duplicate, 2, db.unconfirmed()),
            Err(ValidationError::InvalidStorageEntry)
        );
    }

    #[test]
    fn test_create_miner_moves_stake() {
        let (builder, db) = initialized_store();
        let key = crypto_key(b"new-miner");
        let miner_id = ::crypto::MinerId::from(&key.public());
        let transaction = Transaction::signed(
            2,
            Detail::CreateMiner {
                miner: miner_id,
                stake: 5000,
            },
            builder.key(),
        );
        assert!(validate_transaction(&transaction, 2, db.unconfirmed()).is_ok());
        execute_transaction(&transaction, 2, db.unconfirmed());

        let miner = db.unconfirmed().miner(&miner_id).unwrap();
        assert_eq!(miner.stake, 5000);
        assert_eq!(miner.owner, builder.user_id());

        // duplicate registration
        assert_eq!(
            validate_transaction(&transaction, 2, db.unconfirmed()),
            Err(ValidationError::InvalidMiner)
        );
    }
}
