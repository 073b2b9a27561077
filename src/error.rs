use std;
use std::fmt;
use trackable;
use trackable::error::ErrorKindExt;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);
impl Error {
    pub(crate) fn out_of_memory(requested: usize, missing: usize) -> Self {
        ErrorKind::OutOfMemory
            .cause(Shortfall { requested, missing })
            .into()
    }

    /// 種類が`ErrorKind::OutOfMemory`のエラーであれば、その不足量を返す.
    pub fn shortfall(&self) -> Option<Shortfall> {
        self.concrete_cause::<Shortfall>().cloned()
    }
}
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if let Some(e) = e.get_ref().and_then(|e| e.downcast_ref::<Error>()).cloned() {
            e
        } else if e.kind() == std::io::ErrorKind::InvalidInput {
            ErrorKind::InvalidInput.cause(e).into()
        } else {
            ErrorKind::Other.cause(e).into()
        }
    }
}

/// 割当要求を満たせなかった際の不足量.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    /// 要求されたunit数.
    pub requested: usize,

    /// 最小の次数まで降りた時点で、まだ確保できていなかったunit数.
    pub missing: usize,
}
impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "failed to allocate {} units ({} left)",
            self.requested, self.missing
        )
    }
}
impl std::error::Error for Shortfall {}

/// 発生し得るエラーの種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// ブロックソースに十分な空きがない.
    ///
    /// 全ての次数を次数`0`まで降りても、要求されたunit数を確保できなかった場合に返される.
    /// 途中まで確保したグルーピングは全て解放済みであり、部分的な割当結果が返されることはない.
    ///
    /// 不足量は`Error::shortfall()`で取得できる.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者が時間をおいて要求全体をリトライする
    /// - 不要なバッチを解放する
    OutOfMemory,

    /// 入力が不正.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// 内部状態が不整合に陥っている.
    ///
    /// 解放したunit数がバッチの長さと一致しない、統計テーブルのカウンタが負になる、等.
    /// プログラムにバグがあることを示している.
    ///
    /// # 典型的な対応策
    ///
    /// - バグ修正を行ってプログラムを更新する
    InconsistentState,

    /// その他エラー.
    ///
    /// E.g., `mmap(2)`のシステムコールエラー
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortfall_is_kept_as_cause() {
        let e = track!(Error::out_of_memory(10, 5));
        assert_eq!(*e.kind(), ErrorKind::OutOfMemory);
        assert_eq!(
            e.shortfall(),
            Some(Shortfall {
                requested: 10,
                missing: 5
            })
        );

        let e: Error = ErrorKind::InvalidInput.error().into();
        assert_eq!(e.shortfall(), None);
    }
}
