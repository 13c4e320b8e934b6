//! CAS 脚本摘要缓存
//!
//! 每个仓储实例持有一份缓存，每种脚本首次使用时 SCRIPT LOAD 一次。
//! 服务端丢失脚本（重启、SCRIPT FLUSH、集群中新的节点）时返回 NOSCRIPT，
//! 此时在同一条连接上重新上传并重试一次。

use parking_lot::RwLock;
use redisstore::{CasScript, RedisConnection, StoreError};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::RepoResult;

#[derive(Default)]
pub struct ScriptCache {
    digests: RwLock<HashMap<CasScript, String>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已缓存的摘要
    pub fn cached(&self, script: CasScript) -> Option<String> {
        self.digests.read().get(&script).cloned()
    }

    /// 取摘要，没有则上传。并发的首次上传得到相同摘要，谁写入都一样
    fn digest(&self, conn: &mut dyn RedisConnection, script: CasScript) -> RepoResult<String> {
        if let Some(sha) = self.cached(script) {
            return Ok(sha);
        }
        self.load(conn, script)
    }

    fn load(&self, conn: &mut dyn RedisConnection, script: CasScript) -> RepoResult<String> {
        let sha = conn.script_load(script.body())?;
        debug!("Loaded script {:?} as {}", script, sha);
        self.digests.write().insert(script, sha.clone());
        Ok(sha)
    }

    /// 执行脚本，返回守卫条件是否满足（动作是否执行）
    pub fn eval(
        &self,
        conn: &mut dyn RedisConnection,
        script: CasScript,
        keys: &[&[u8]],
        args: &[&[u8]],
    ) -> RepoResult<bool> {
        let sha = self.digest(conn, script)?;
        let fired = match conn.evalsha(&sha, keys, args) {
            Ok(n) => n == 1,
            Err(StoreError::NoScript) => {
                warn!("Script {:?} missing on server, reloading", script);
                let sha = self.load(conn, script)?;
                conn.evalsha(&sha, keys, args)? == 1
            }
            Err(e) => return Err(e.into()),
        };
        Ok(fired)
    }
}
