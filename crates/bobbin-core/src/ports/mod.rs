//! Ports - 外部コラボレータへのインターフェース
//!
//! 各 trait は外部システム（優先度キュー付きストア、通知バス、時計、ID 生成）への
//! 境界を定義し、実装の詳細を隠蔽します。開発・テスト用の実装は `impls` にあります。

pub mod clock;
pub mod id_generator;
pub mod notifier;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::notifier::{Notifier, NotifyError};
pub use self::store::{PriorityQueueStore, Score, ScoredValue, StoreError, keys};
