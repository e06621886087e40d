#![allow(dead_code)]
use bitcoin::{
    absolute::LockTime,
    block::{Header as BlockHeader, Version as BlockVersion},
    hash_types::TxMerkleNode,
    hashes::Hash,
    pow::CompactTarget,
    script::Builder,
    transaction::Version,
    Address, Amount, Block, BlockHash, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, WPubkeyHash, Witness,
};
use descriptor_activity::MemoryChain;
use std::sync::Arc;

/// Regtest P2WPKH destination derived from `seed`: (script, address string).
pub fn destination(seed: u8) -> (ScriptBuf, String) {
    let spk = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([seed; 20]));
    let addr = Address::from_script(&spk, Network::Regtest)
        .unwrap()
        .to_string();
    (spk, addr)
}

/// Script every funding output pays to.
pub fn funding_script() -> ScriptBuf {
    destination(0xff).0
}

pub fn coinbase(tag: u32, outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: Builder::new().push_int(tag as i64).into_script(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs,
    }
}

pub fn spend(inputs: &[OutPoint], outputs: Vec<(ScriptBuf, Amount)>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|prevout| TxIn {
                previous_output: *prevout,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .into_iter()
            .map(|(script_pubkey, value)| TxOut {
                value,
                script_pubkey,
            })
            .collect(),
    }
}

pub fn make_block(prev: BlockHash, nonce: u32, txdata: Vec<Transaction>) -> Block {
    let header = BlockHeader {
        version: BlockVersion::from_consensus(2),
        prev_blockhash: prev,
        merkle_root: TxMerkleNode::all_zeros(),
        time: nonce,
        bits: CompactTarget::from_consensus(0x207fffff),
        nonce,
    };
    let mut block = Block { header, txdata };
    if let Some(root) = block.compute_merkle_root() {
        block.header.merkle_root = root;
    }
    block
}

/// Drives a [`MemoryChain`] the way a regtest node plus a tiny wallet would.
pub struct Harness {
    pub chain: Arc<MemoryChain>,
    funding: Vec<OutPoint>,
    pending: Vec<Transaction>,
    mined: u32,
}

impl Harness {
    /// Genesis block whose coinbase pays 40 funding outputs.
    pub fn new() -> anyhow::Result<Self> {
        let chain = Arc::new(MemoryChain::new());
        let outputs = (0..40)
            .map(|_| TxOut {
                value: Amount::from_btc(5.0).unwrap(),
                script_pubkey: funding_script(),
            })
            .collect();
        let cb = coinbase(0, outputs);
        let txid = cb.compute_txid();
        chain.connect_block(make_block(BlockHash::all_zeros(), 0, vec![cb]))?;

        Ok(Self {
            chain,
            funding: (0..40).rev().map(|vout| OutPoint::new(txid, vout)).collect(),
            pending: Vec::new(),
            mined: 0,
        })
    }

    /// Pay `amount` to `script` from a fresh funding output; the tx enters the mempool.
    pub fn send_to(&mut self, script: &ScriptBuf, amount: Amount) -> anyhow::Result<Transaction> {
        let input = self
            .funding
            .pop()
            .ok_or_else(|| anyhow::anyhow!("harness ran out of funding outputs"))?;
        let change = Amount::from_btc(5.0)? - amount - Amount::from_sat(1_000);
        let tx = spend(&[input], vec![(funding_script(), change), (script.clone(), amount)]);
        self.submit(tx.clone())?;
        Ok(tx)
    }

    /// Put an arbitrary transaction in the mempool and the next block.
    pub fn submit(&mut self, tx: Transaction) -> anyhow::Result<Txid> {
        let txid = self.chain.add_to_mempool(tx.clone())?;
        self.pending.push(tx);
        Ok(txid)
    }

    /// Mine every transaction sent since the previous block.
    pub fn mine(&mut self) -> anyhow::Result<BlockHash> {
        let txs = std::mem::take(&mut self.pending);
        self.mine_with(txs)
    }

    /// Mine a block with exactly `txs` after the coinbase.
    pub fn mine_with(&mut self, txs: Vec<Transaction>) -> anyhow::Result<BlockHash> {
        self.mined += 1;
        let (_, tip) = self
            .chain
            .tip()?
            .ok_or_else(|| anyhow::anyhow!("no tip"))?;
        let mut txdata = vec![coinbase(
            self.mined,
            vec![TxOut {
                value: Amount::from_btc(50.0)?,
                script_pubkey: ScriptBuf::new(),
            }],
        )];
        txdata.extend(txs);
        let block = make_block(tip, self.mined, txdata);
        let hash = block.block_hash();
        self.chain.connect_block(block)?;
        Ok(hash)
    }

    /// Drop the tip block; its transactions go back to the mempool.
    pub fn disconnect(&mut self) -> anyhow::Result<BlockHash> {
        self.chain
            .disconnect_tip()?
            .ok_or_else(|| anyhow::anyhow!("nothing to disconnect"))
    }

    pub fn height(&self) -> anyhow::Result<u32> {
        Ok(self.chain.tip()?.map(|(h, _)| h).unwrap_or(0))
    }
}

/// Index of the first output of `tx` paying to `script`.
pub fn vout_to(tx: &Transaction, script: &ScriptBuf) -> u32 {
    tx.output
        .iter()
        .position(|o| &o.script_pubkey == script)
        .expect("output to script") as u32
}
