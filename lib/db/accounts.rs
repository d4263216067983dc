//! Typed queries for [`crate::models::Account`].

use sqlx::Row;

use crate::db::{from_text, opt_from_text, opt_to_text, to_text, Pool};
use crate::models::{Account, ExternalPeer};
use crate::{KeppelError, KeppelResult};

pub(super) fn row_to_account(row: sqlx::sqlite::SqliteRow) -> KeppelResult<Account> {
    let external_peer = match (
        row.try_get::<Option<String>, _>("external_peer_url")?,
        row.try_get::<Option<String>, _>("external_peer_username")?,
        row.try_get::<Option<String>, _>("external_peer_password")?,
    ) {
        (Some(url), Some(username), Some(password)) => Some(ExternalPeer {
            url,
            username,
            password,
        }),
        _ => None,
    };

    Ok(Account::from_row(
        row.try_get("name")?,
        row.try_get("auth_tenant_id")?,
        row.try_get("upstream_peer_hostname")?,
        external_peer,
        serde_json::from_str(&row.try_get::<String, _>("platform_filter_json")?)?,
        serde_json::from_str(&row.try_get::<String, _>("required_labels_json")?)?,
        row.try_get::<i64, _>("is_deleting")? != 0,
        row.try_get::<i64, _>("is_managed")? != 0,
        serde_json::from_str(&row.try_get::<String, _>("rbac_policies_json")?)?,
        serde_json::from_str(&row.try_get::<String, _>("gc_policies_json")?)?,
        serde_json::from_str(&row.try_get::<String, _>("security_scan_policies_json")?)?,
        serde_json::from_str(&row.try_get::<String, _>("tag_policies_json")?)?,
        opt_from_text(row.try_get("next_federation_announcement_at")?)?,
        opt_from_text(row.try_get("next_managed_reconciliation_at")?)?,
        from_text(&row.try_get::<String, _>("created_at")?)?,
    ))
}

impl Pool {
    /// Inserts a new account.
    pub async fn insert_account(&self, account: &Account) -> KeppelResult<()> {
        let (url, username, password) = match account.get_external_peer() {
            Some(p) => (Some(p.url.clone()), Some(p.username.clone()), Some(p.password.clone())),
            None => (None, None, None),
        };

        sqlx::query(
            "INSERT INTO accounts (
                name, auth_tenant_id, upstream_peer_hostname,
                external_peer_url, external_peer_username, external_peer_password,
                platform_filter_json, required_labels_json, is_deleting, is_managed,
                rbac_policies_json, gc_policies_json, security_scan_policies_json, tag_policies_json,
                next_federation_announcement_at, next_managed_reconciliation_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(account.get_name())
        .bind(account.get_auth_tenant_id())
        .bind(account.get_upstream_peer_hostname())
        .bind(url)
        .bind(username)
        .bind(password)
        .bind(serde_json::to_string(account.get_platform_filter())?)
        .bind(serde_json::to_string(account.get_required_labels())?)
        .bind(*account.get_is_deleting() as i64)
        .bind(*account.get_is_managed() as i64)
        .bind(serde_json::to_string(account.get_rbac_policies_json())?)
        .bind(serde_json::to_string(account.get_gc_policies_json())?)
        .bind(serde_json::to_string(account.get_security_scan_policies_json())?)
        .bind(serde_json::to_string(account.get_tag_policies_json())?)
        .bind(opt_to_text(*account.get_next_federation_announcement_at()))
        .bind(opt_to_text(*account.get_next_managed_reconciliation_at()))
        .bind(to_text(*account.get_created_at()))
        .execute(self.sqlite())
        .await?;

        Ok(())
    }

    /// Fetches an account by name.
    pub async fn get_account(&self, name: &str) -> KeppelResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE name = ?")
            .bind(name)
            .fetch_optional(self.sqlite())
            .await?;

        row.map(row_to_account).transpose()
    }

    /// Lists every account owned by an auth tenant.
    pub async fn list_accounts_by_tenant(&self, auth_tenant_id: &str) -> KeppelResult<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE auth_tenant_id = ? ORDER BY name")
            .bind(auth_tenant_id)
            .fetch_all(self.sqlite())
            .await?;

        rows.into_iter().map(row_to_account).collect()
    }

    /// Updates the account-management-editable fields of an existing account (`PUT
    /// /keppel/v1/accounts/{name}`): platform filter and required labels. Replication, federation
    /// bookkeeping and the managed-account policy blobs are not settable through this path.
    pub async fn update_account_fields(&self, account: &Account) -> KeppelResult<()> {
        let result = sqlx::query(
            "UPDATE accounts SET platform_filter_json = ?, required_labels_json = ? WHERE name = ?",
        )
        .bind(serde_json::to_string(account.get_platform_filter())?)
        .bind(serde_json::to_string(account.get_required_labels())?)
        .bind(account.get_name())
        .execute(self.sqlite())
        .await?;

        if result.rows_affected() == 0 {
            return Err(KeppelError::NotFound(format!("account {:?}", account.get_name())));
        }
        Ok(())
    }

    /// Marks an account as deleting, blocking new pushes (the first step of the AccountDeletion
    /// saga).
    pub async fn mark_account_deleting(&self, name: &str) -> KeppelResult<()> {
        let result = sqlx::query("UPDATE accounts SET is_deleting = 1 WHERE name = ?")
            .bind(name)
            .execute(self.sqlite())
            .await?;

        if result.rows_affected() == 0 {
            return Err(KeppelError::NotFound(format!("account {name:?}")));
        }
        Ok(())
    }

    /// Deletes an account row outright; only valid once the AccountDeletion saga has confirmed no
    /// repositories remain.
    pub async fn delete_account(&self, name: &str) -> KeppelResult<()> {
        sqlx::query("DELETE FROM accounts WHERE name = ?")
            .bind(name)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }
}
