pub mod db;

pub use db::{
    create_db, create_memory_db, deactivate_account, delete_entry, find_statement_account,
    find_transaction, get_account, get_account_by_code, get_all_accounts, get_rules,
    get_transaction, get_transactions_for_account, insert_account, insert_transaction,
    link_entry_to_transaction, link_statement_account, load_ledger, merge_accounts, post_entry,
    recategorize_transaction, save_rule, seed_default_accounts, set_rule_active, DbPool,
    StorageError, StoredRule,
};
