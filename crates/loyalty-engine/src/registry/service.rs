//! 码注册表服务

use std::sync::Arc;

use chrono::{DateTime, Utc};
use loyalty_shared::config::CodesConfig;
use tracing::{debug, instrument, warn};

use super::identity::{parse_serial, random_identifier, serial_number, short_hash};
use crate::error::{LoyaltyError, Result};
use crate::models::{Code, NewCode, ParticipantKind};
use crate::repository::{CodeRepository, InsertCodeOutcome};

/// 码注册表
pub struct CodeRegistry {
    codes: Arc<dyn CodeRepository>,
    config: CodesConfig,
}

impl CodeRegistry {
    pub fn new(codes: Arc<dyn CodeRepository>, config: CodesConfig) -> Self {
        Self { codes, config }
    }

    /// 类型的默认积分
    pub fn default_reward(&self, kind: ParticipantKind) -> i64 {
        match kind {
            ParticipantKind::Electrician => self.config.electrician_reward,
            ParticipantKind::Seller => self.config.seller_reward,
        }
    }

    /// 生成未被占用的标识符
    ///
    /// 同一长度下最多尝试 `max_identifier_attempts` 次，全部碰撞则长度加一，
    /// 超过 `max_identifier_length` 返回 `IdentifierSpaceExhausted`
    pub async fn generate_identifier(
        &self,
        kind: ParticipantKind,
        length: usize,
    ) -> Result<String> {
        let mut length = length.max(1);

        while length <= self.config.max_identifier_length {
            for _ in 0..self.config.max_identifier_attempts.max(1) {
                let candidate = random_identifier(kind, length);
                let hash = short_hash(&candidate);
                if !self.codes.identifier_exists(&candidate, &hash).await? {
                    return Ok(candidate);
                }
            }

            warn!(kind = %kind, length, "标识符碰撞次数达到上限，增加长度");
            length += 1;
        }

        Err(LoyaltyError::IdentifierSpaceExhausted(
            self.config.max_identifier_length,
        ))
    }

    /// 下一个序列号：该类型最后一个序列号加一
    pub async fn generate_serial(&self, kind: ParticipantKind) -> Result<String> {
        let next = self.next_serial_value(kind).await?;
        Ok(serial_number(kind, next, self.config.serial_width))
    }

    async fn next_serial_value(&self, kind: ParticipantKind) -> Result<u64> {
        let last = self.codes.last_serial(kind).await?;
        Ok(last.as_deref().and_then(parse_serial).unwrap_or(0) + 1)
    }

    /// 创建单个码，`reward_value` 为空时取类型默认积分
    #[instrument(skip(self))]
    pub async fn create(&self, kind: ParticipantKind, reward_value: Option<i64>) -> Result<Code> {
        match self.insert_code(kind, reward_value, None).await? {
            Some(code) => Ok(code),
            None => Err(LoyaltyError::Internal("非任务码不应发生槽位冲突".into())),
        }
    }

    /// 作为批量任务第 `seq` 个单元创建码；该槽位已写入时返回 `None`
    pub async fn create_for_job(
        &self,
        kind: ParticipantKind,
        reward_value: Option<i64>,
        job_id: i64,
        seq: i64,
    ) -> Result<Option<Code>> {
        self.insert_code(kind, reward_value, Some((job_id, seq))).await
    }

    async fn insert_code(
        &self,
        kind: ParticipantKind,
        reward_value: Option<i64>,
        slot: Option<(i64, i64)>,
    ) -> Result<Option<Code>> {
        let reward_value = reward_value.unwrap_or_else(|| self.default_reward(kind));
        if reward_value < 0 {
            return Err(LoyaltyError::Validation(format!(
                "积分不能为负: {}",
                reward_value
            )));
        }

        let mut code = self
            .generate_identifier(kind, self.config.identifier_length)
            .await?;
        let mut serial_value = self.next_serial_value(kind).await?;
        let mut serial_retries = 0;
        let mut identifier_retries = 0;

        loop {
            let new_code = NewCode {
                hash: short_hash(&code),
                code: code.clone(),
                serial_number: serial_number(kind, serial_value, self.config.serial_width),
                kind,
                reward_value,
                job_id: slot.map(|s| s.0),
                job_seq: slot.map(|s| s.1),
            };

            match self.codes.insert(&new_code).await? {
                InsertCodeOutcome::Inserted(created) => {
                    debug!(code = %created.code, serial = %created.serial_number, "码已创建");
                    return Ok(Some(created));
                }
                InsertCodeOutcome::DuplicateJobSlot => return Ok(None),
                InsertCodeOutcome::DuplicateSerial => {
                    serial_retries += 1;
                    if serial_retries > self.config.max_serial_attempts {
                        return Err(LoyaltyError::SerialConflict(kind.to_string()));
                    }
                    serial_value += 1;
                }
                InsertCodeOutcome::DuplicateIdentifier => {
                    // 检查与写入之间被并发占用
                    identifier_retries += 1;
                    if identifier_retries > self.config.max_identifier_attempts {
                        return Err(LoyaltyError::ConcurrencyConflict);
                    }
                    code = self
                        .generate_identifier(kind, self.config.identifier_length)
                        .await?;
                }
            }
        }
    }

    /// 按主标识符或短哈希解析码（大小写不敏感）
    pub async fn resolve(&self, identifier: &str) -> Result<Option<Code>> {
        let trimmed = identifier.trim();
        if trimmed.is_empty()
            || !trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(LoyaltyError::Validation(format!(
                "码格式不合法: {:?}",
                identifier
            )));
        }

        self.codes
            .find_by_identifier(&trimmed.to_ascii_uppercase(), &trimmed.to_ascii_lowercase())
            .await
    }

    /// 未扫描 -> 已扫描，只有第一个并发调用者返回 true
    pub async fn mark_scanned(
        &self,
        code_id: i64,
        participant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.codes.mark_scanned(code_id, participant_id, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ALPHABET;
    use crate::repository::{InMemoryStore, MockCodeRepository};

    fn registry(store: Arc<dyn CodeRepository>, config: CodesConfig) -> CodeRegistry {
        CodeRegistry::new(store, config)
    }

    #[tokio::test]
    async fn test_create_assigns_defaults_and_serials() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store.clone(), CodesConfig::default());

        let first = registry.create(ParticipantKind::Electrician, None).await.unwrap();
        let second = registry.create(ParticipantKind::Electrician, None).await.unwrap();
        let seller = registry.create(ParticipantKind::Seller, Some(35)).await.unwrap();

        assert!(first.code.starts_with("E-"));
        assert_eq!(first.reward_value, 50);
        assert_eq!(first.serial_number, "E0000001");
        assert_eq!(second.serial_number, "E0000002");
        assert_eq!(seller.serial_number, "D0000001");
        assert_eq!(seller.reward_value, 35);
        assert_eq!(first.hash, short_hash(&first.code));
    }

    #[tokio::test]
    async fn test_identifier_grows_when_space_is_full() {
        let store = Arc::new(InMemoryStore::new());
        // 占满所有长度为 1 的电工码
        for (i, c) in ALPHABET.iter().enumerate() {
            let code = format!("E-{}", *c as char);
            store
                .insert(&NewCode {
                    hash: short_hash(&code),
                    code,
                    serial_number: serial_number(ParticipantKind::Electrician, i as u64 + 1, 7),
                    kind: ParticipantKind::Electrician,
                    reward_value: 50,
                    job_id: None,
                    job_seq: None,
                })
                .await
                .unwrap();
        }

        let config = CodesConfig {
            identifier_length: 1,
            max_identifier_attempts: 5,
            ..Default::default()
        };
        let registry = registry(store.clone(), config.clone());
        let id = registry
            .generate_identifier(ParticipantKind::Electrician, 1)
            .await
            .unwrap();
        assert_eq!(id.len(), "E-".len() + 2);

        let capped = CodeRegistry::new(
            store,
            CodesConfig {
                max_identifier_length: 1,
                ..config
            },
        );
        let err = capped
            .generate_identifier(ParticipantKind::Electrician, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LoyaltyError::IdentifierSpaceExhausted(1)));
    }

    #[tokio::test]
    async fn test_serial_collision_increments() {
        let mut repo = MockCodeRepository::new();
        repo.expect_identifier_exists().returning(|_, _| Ok(false));
        repo.expect_last_serial()
            .returning(|_| Ok(Some("D0000009".to_string())));
        let mut calls = 0;
        repo.expect_insert().returning(move |new_code| {
            calls += 1;
            if calls == 1 {
                assert_eq!(new_code.serial_number, "D0000010");
                Ok(InsertCodeOutcome::DuplicateSerial)
            } else {
                assert_eq!(new_code.serial_number, "D0000011");
                Ok(InsertCodeOutcome::Inserted(Code {
                    id: 1,
                    code: new_code.code.clone(),
                    hash: new_code.hash.clone(),
                    serial_number: new_code.serial_number.clone(),
                    kind: new_code.kind,
                    reward_value: new_code.reward_value,
                    is_scanned: false,
                    scanned_by: None,
                    scanned_at: None,
                    job_id: None,
                    job_seq: None,
                    created_at: Utc::now(),
                }))
            }
        });

        let registry = registry(Arc::new(repo), CodesConfig::default());
        let code = registry.create(ParticipantKind::Seller, None).await.unwrap();
        assert_eq!(code.serial_number, "D0000011");
        assert_eq!(code.reward_value, 20);
    }

    #[tokio::test]
    async fn test_serial_conflict_exhausts() {
        let mut repo = MockCodeRepository::new();
        repo.expect_identifier_exists().returning(|_, _| Ok(false));
        repo.expect_last_serial().returning(|_| Ok(None));
        repo.expect_insert()
            .returning(|_| Ok(InsertCodeOutcome::DuplicateSerial));

        let registry = registry(
            Arc::new(repo),
            CodesConfig {
                max_serial_attempts: 2,
                ..Default::default()
            },
        );
        let err = registry
            .create(ParticipantKind::Electrician, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LoyaltyError::SerialConflict(_)));
    }

    #[tokio::test]
    async fn test_resolve_is_case_insensitive() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry(store, CodesConfig::default());
        let code = registry.create(ParticipantKind::Seller, None).await.unwrap();

        let by_code = registry.resolve(&code.code.to_lowercase()).await.unwrap();
        assert_eq!(by_code.map(|c| c.id), Some(code.id));

        let by_hash = registry.resolve(&code.hash.to_uppercase()).await.unwrap();
        assert_eq!(by_hash.map(|c| c.id), Some(code.id));

        assert!(registry.resolve("D-NOPE").await.unwrap().is_none());
        assert!(matches!(
            registry.resolve("  ").await,
            Err(LoyaltyError::Validation(_))
        ));
        assert!(matches!(
            registry.resolve("E-AB;DROP").await,
            Err(LoyaltyError::Validation(_))
        ));
    }
}
