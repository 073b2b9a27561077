//! Tiered bulk unit allocator.
//!
//! `tierpool`は、固定長の割当単位(unit)を`N`個まとめて確保するための、ハードウェア非依存のアロケータ.
//!
//! # 特徴
//!
//! - 要求されたunit数を、可能な限り大きな2の冪の連続領域(グルーピング)の組み合わせで満たす
//!   - 大きな次数で取得できない場合(断片化等)には、より小さい次数に降りていく
//!   - 例: 13個の要求に対しては`8 + 4 + 1`のグルーピングが取得される
//! - 次数`0`まで降りても要求を満たせない場合には、取得済みのグルーピングを全て返却した上で失敗する
//!   - 部分的に割り当てられた状態が呼び出し側に見えることはない
//! - 次数ごとの未解放グルーピング数を、アトミックなカウンタで管理する[TierTable]を備える
//!   - テーブルはアロケータの構築時に注入され、複数のアロケータで共有することも可能
//! - unitの実際の供給元は[BlockSource]トレイトとして抽象化されている
//!
//! # モジュールの依存関係
//!
//! ```text
//! allocator => {tier, source} => order
//! ```
//!
//! - [allocator]モジュール:
//!   - 主に[BulkAllocator]構造体を提供
//!   - `tierpool`の利用者が直接触るのはこの構造体
//! - [tier]モジュール:
//!   - 次数ごとの統計テーブルと、その読み出し結果を提供
//! - [source]モジュール:
//!   - 主に[BlockSource]トレイトとその実装である[MemoryBlockSource]および[MmapBlockSource]を提供
//!
//! [allocator]: ./allocator/index.html
//! [BulkAllocator]: ./allocator/struct.BulkAllocator.html
//! [tier]: ./tier/index.html
//! [TierTable]: ./tier/struct.TierTable.html
//! [source]: ./source/index.html
//! [BlockSource]: ./source/trait.BlockSource.html
//! [MemoryBlockSource]: ./source/struct.MemoryBlockSource.html
//! [MmapBlockSource]: ./source/struct.MmapBlockSource.html
#![warn(missing_docs)]
#[cfg(unix)]
extern crate libc;
extern crate prometrics;
#[macro_use]
extern crate trackable;
#[macro_use]
extern crate slog;

pub use crate::error::{Error, ErrorKind, Shortfall};
pub use crate::order::Order;

pub mod allocator;
pub mod metrics;
pub mod source;
pub mod tier;

mod error;
mod order;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
