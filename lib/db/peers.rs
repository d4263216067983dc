//! Typed queries for [`crate::models::Peer`].

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::db::{opt_from_text, opt_to_text, Pool};
use crate::models::Peer;
use crate::KeppelResult;

fn row_to_peer(row: sqlx::sqlite::SqliteRow) -> KeppelResult<Peer> {
    Ok(Peer::from_row(
        row.try_get("hostname")?,
        row.try_get::<i64, _>("use_for_pull_delegation")? != 0,
        row.try_get("our_password")?,
        row.try_get("their_current_password_hash")?,
        row.try_get("their_previous_password_hash")?,
        opt_from_text(row.try_get("last_peered_at")?)?,
    ))
}

impl Pool {
    /// Registers a new peer.
    pub async fn insert_peer(&self, peer: &Peer) -> KeppelResult<()> {
        sqlx::query(
            "INSERT INTO peers (hostname, use_for_pull_delegation, our_password, their_current_password_hash, their_previous_password_hash, last_peered_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(peer.get_hostname())
        .bind(*peer.get_use_for_pull_delegation() as i64)
        .bind(peer.get_our_password())
        .bind(peer.get_their_current_password_hash())
        .bind(peer.get_their_previous_password_hash())
        .bind(opt_to_text(*peer.get_last_peered_at()))
        .execute(self.sqlite())
        .await?;
        Ok(())
    }

    /// Fetches a peer by hostname.
    pub async fn get_peer(&self, hostname: &str) -> KeppelResult<Option<Peer>> {
        let row = sqlx::query("SELECT * FROM peers WHERE hostname = ?")
            .bind(hostname)
            .fetch_optional(self.sqlite())
            .await?;

        row.map(row_to_peer).transpose()
    }

    /// Lists every known peer.
    pub async fn list_peers(&self) -> KeppelResult<Vec<Peer>> {
        let rows = sqlx::query("SELECT * FROM peers ORDER BY hostname")
            .fetch_all(self.sqlite())
            .await?;

        rows.into_iter().map(row_to_peer).collect()
    }

    /// Persists a freshly rotated outbound password for a peer (IssueNewPasswordForPeerJob).
    pub async fn update_peer_our_password(
        &self,
        hostname: &str,
        our_password: &str,
        peered_at: DateTime<Utc>,
    ) -> KeppelResult<()> {
        sqlx::query("UPDATE peers SET our_password = ?, last_peered_at = ? WHERE hostname = ?")
            .bind(our_password)
            .bind(opt_to_text(Some(peered_at)))
            .bind(hostname)
            .execute(self.sqlite())
            .await?;
        Ok(())
    }

    /// Records a newly POSTed inbound password from a peer, rotating their previous hash into the
    /// grace-window slot.
    pub async fn rotate_peer_their_password(
        &self,
        hostname: &str,
        new_hash: &str,
    ) -> KeppelResult<()> {
        sqlx::query(
            "UPDATE peers SET their_previous_password_hash = their_current_password_hash, their_current_password_hash = ? \
             WHERE hostname = ?",
        )
        .bind(new_hash)
        .bind(hostname)
        .execute(self.sqlite())
        .await?;
        Ok(())
    }
}
