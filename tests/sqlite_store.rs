#![cfg(feature = "store-sqlite")]

mod common;

use bitcoin::{
    hashes::Hash, Amount, Block, BlockHash, OutPoint, ScriptBuf, Transaction, TxOut, Txid,
};
use common::{coinbase, destination, funding_script, make_block, spend};
use descriptor_activity::prelude::*;
use descriptor_activity::{BlockRejection, StaleSnapshot};
use tempfile::TempDir;

/// Genesis pays 5 BTC to the funding script; returns its first output.
async fn genesis(store: &SqliteChainStore) -> anyhow::Result<(BlockHash, OutPoint)> {
    let cb = coinbase(
        0,
        vec![TxOut {
            value: Amount::from_btc(5.0)?,
            script_pubkey: funding_script(),
        }],
    );
    let funding = OutPoint::new(cb.compute_txid(), 0);
    let block = make_block(BlockHash::all_zeros(), 0, vec![cb]);
    let hash = block.block_hash();
    store.connect_block(block).await?;
    Ok((hash, funding))
}

fn reward(tag: u32) -> bitcoin::Transaction {
    coinbase(
        tag,
        vec![TxOut {
            value: Amount::from_btc(50.0).unwrap(),
            script_pubkey: ScriptBuf::new(),
        }],
    )
}

#[tokio::test]
async fn receive_and_spend_over_sqlite() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = SqliteChainStore::new(dir.path().join("chain.sqlite"))?;
    let (tip, funding) = genesis(&store).await?;

    let (spk, a) = destination(1);
    let (other, _) = destination(2);

    let pay = spend(&[funding], vec![(spk.clone(), Amount::from_btc(1.0)?)]);
    store.add_to_mempool(pay.clone()).await?;
    let b1 = make_block(tip, 1, vec![reward(1), pay.clone()]);
    let b1_hash = b1.block_hash();
    assert_eq!(store.connect_block(b1).await?, 1);

    let out = spend(
        &[OutPoint::new(pay.compute_txid(), 0)],
        vec![(other, Amount::from_btc(0.9)?)],
    );
    store.add_to_mempool(out.clone()).await?;

    let engine = ActivityEngine::new(store);
    let result = engine
        .get_descriptor_activity(&[b1_hash.to_string()], &[format!("addr({a})")], true)
        .await?;

    assert_eq!(result.activity.len(), 2);
    match &result.activity[0] {
        ActivityRecord::Receive(r) => {
            assert_eq!(r.txid, pay.compute_txid());
            assert_eq!(r.blockhash, Some(b1_hash));
            assert_eq!(r.height, Some(1));
        }
        other => panic!("expected a receive, got {other:?}"),
    }
    match &result.activity[1] {
        ActivityRecord::Spend(s) => {
            assert_eq!(s.spend_txid, out.compute_txid());
            assert_eq!(s.prevout_txid, pay.compute_txid());
            assert_eq!(s.blockhash, None);
        }
        other => panic!("expected a spend, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn reorged_block_is_rejected() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = SqliteChainStore::new(dir.path().join("chain.sqlite"))?;
    let (tip, _) = genesis(&store).await?;
    let (spk, a) = destination(1);

    let side = make_block(
        tip,
        1,
        vec![coinbase(
            1,
            vec![TxOut {
                value: Amount::from_btc(50.0)?,
                script_pubkey: spk,
            }],
        )],
    );
    let side_hash = side.block_hash();
    store.connect_block(side).await?;
    assert_eq!(store.disconnect_tip().await?, Some(side_hash));
    store.connect_block(make_block(tip, 2, vec![reward(2)])).await?;

    let engine = ActivityEngine::new(store);
    let err = engine
        .get_descriptor_activity(&[side_hash.to_string()], &[format!("addr({a})")], false)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            ActivityError::UnknownBlock {
                reason: BlockRejection::NotInActiveChain,
                ..
            }
        ),
        "{err}"
    );
    Ok(())
}

#[tokio::test]
async fn snapshot_goes_stale_after_a_write() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = SqliteChainStore::new(dir.path().join("chain.sqlite"))?;
    let (tip, funding) = genesis(&store).await?;

    let snapshot = store.snapshot().await?;
    assert!(snapshot.block(tip).await?.is_some());

    let (spk, _) = destination(1);
    store
        .add_to_mempool(spend(&[funding], vec![(spk, Amount::from_btc(1.0)?)]))
        .await?;

    let err = snapshot.block(tip).await.unwrap_err();
    let stale = err
        .downcast_ref::<StaleSnapshot>()
        .expect("stale snapshot error");
    assert_eq!(stale.expected, snapshot.generation());
    assert!(stale.found > stale.expected);

    // mempool was captured when the snapshot was taken
    assert!(snapshot.mempool_transactions().await?.is_empty());

    let fresh = store.snapshot().await?;
    assert_eq!(fresh.mempool_transactions().await?.len(), 1);
    assert!(fresh.block(tip).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn state_survives_reopen() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("chain.sqlite");
    let tip = {
        let store = SqliteChainStore::new(&path)?;
        genesis(&store).await?.0
    };

    let store = SqliteChainStore::new(&path)?;
    assert_eq!(store.tip_block().await?, Some((0, tip)));
    let snapshot = store.snapshot().await?;
    assert!(snapshot.is_on_active_chain(tip).await?);
    assert_eq!(snapshot.block_height(tip).await?, Some(0));
    Ok(())
}

#[tokio::test]
async fn active_block_cannot_be_stored_as_stale() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let store = SqliteChainStore::new(dir.path().join("chain.sqlite"))?;
    let (tip, _) = genesis(&store).await?;

    let b1 = make_block(tip, 1, vec![reward(1)]);
    let b1_hash = b1.block_hash();
    store.connect_block(b1.clone()).await?;
    assert!(store.store_stale_block(b1, 7).await.is_err());

    let side = make_block(tip, 2, vec![reward(2)]);
    let side_hash = store.store_stale_block(side, 1).await?;

    let snapshot = store.snapshot().await?;
    assert_eq!(snapshot.block_height(b1_hash).await?, Some(1));
    assert!(snapshot.is_on_active_chain(b1_hash).await?);
    assert_eq!(snapshot.block_height(side_hash).await?, Some(1));
    assert!(!snapshot.is_on_active_chain(side_hash).await?);
    Ok(())
}

/// Genesis with three funding outputs, a block confirming `a` and `c`, `b` unconfirmed.
fn requeue_scenario() -> (Block, Block, Transaction, Vec<Txid>) {
    let (spk, _) = destination(1);
    let cb = coinbase(
        0,
        (0..3)
            .map(|_| TxOut {
                value: Amount::from_btc(5.0).unwrap(),
                script_pubkey: funding_script(),
            })
            .collect(),
    );
    let pay = |vout| {
        spend(
            &[OutPoint::new(cb.compute_txid(), vout)],
            vec![(spk.clone(), Amount::from_btc(1.0).unwrap())],
        )
    };
    let (a, b, c) = (pay(0), pay(1), pay(2));
    let genesis = make_block(BlockHash::all_zeros(), 0, vec![cb.clone()]);
    let b1 = make_block(genesis.block_hash(), 1, vec![reward(1), a.clone(), c.clone()]);
    let expected = vec![a.compute_txid(), c.compute_txid(), b.compute_txid()];
    (genesis, b1, b, expected)
}

fn txids(txs: &[Transaction]) -> Vec<Txid> {
    txs.iter().map(|tx| tx.compute_txid()).collect()
}

#[tokio::test]
async fn disconnected_txs_rejoin_at_the_front_of_the_mempool() -> anyhow::Result<()> {
    let (genesis, b1, b, expected) = requeue_scenario();

    let memory = MemoryChain::new();
    memory.connect_block(genesis.clone())?;
    memory.connect_block(b1.clone())?;
    memory.add_to_mempool(b.clone())?;
    memory.disconnect_tip()?;
    let in_memory = memory.snapshot().await?.mempool_transactions().await?;

    let dir = TempDir::new()?;
    let store = SqliteChainStore::new(dir.path().join("chain.sqlite"))?;
    store.connect_block(genesis).await?;
    store.connect_block(b1).await?;
    store.add_to_mempool(b).await?;
    store.disconnect_tip().await?;
    let in_sqlite = store.snapshot().await?.mempool_transactions().await?;

    assert_eq!(txids(&in_memory), expected);
    assert_eq!(txids(&in_sqlite), expected);

    // order is persisted
    let reopened = SqliteChainStore::new(dir.path().join("chain.sqlite"))?;
    let again = reopened.snapshot().await?.mempool_transactions().await?;
    assert_eq!(txids(&again), expected);
    Ok(())
}
