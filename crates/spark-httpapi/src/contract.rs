//! 契约描述符：以稳定、唯一的方式标识一个 HTTP 契约。
//!
//! # 设计背景（Why）
//! - 注册表、通道工厂与运行期绑定器都需要一个共同的键来定位“同一个契约”；
//! - 编译期路径通过泛型参数 `C` 得到描述符，运行期路径直接持有描述符值，两者必须等价。
//!
//! # 契约说明（What）
//! - 相等性与哈希只依赖 [`TypeId`]，因此不同契约永不碰撞；
//! - [`ContractDescriptor::name`] 为去掉 `dyn ` 前缀的全限定类型名，用作通道名与配置作用域名。

use core::any::{TypeId, type_name};
use core::fmt;
use core::hash::{Hash, Hasher};
use core::mem::size_of;

use crate::error::{HttpApiError, Result};

/// 契约类型的形态分类。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ContractShape {
    /// trait object，即纯能力面。
    Interface,
    /// 拥有存储状态的具体类型。
    Concrete,
    /// 切片、`str` 等非 trait 的动态大小类型。
    Unsized,
}

impl ContractShape {
    fn detect<C: ?Sized + 'static>(qualified: &str) -> Self {
        // 瘦指针意味着 `C: Sized`。
        if size_of::<&C>() == size_of::<usize>() {
            ContractShape::Concrete
        } else if qualified.starts_with("dyn ") {
            ContractShape::Interface
        } else {
            ContractShape::Unsized
        }
    }

    fn describe(self) -> &'static str {
        match self {
            ContractShape::Interface => "trait object",
            ContractShape::Concrete => "sized type with stored state",
            ContractShape::Unsized => "dynamically sized non-trait type",
        }
    }
}

/// `ContractDescriptor` 标识一个用户契约，是注册表与通道工厂共用的键。
///
/// # 教案级注释
/// - **意图 (Why)**：把“编译期类型参数”与“运行期类型句柄”收敛到同一个值类型上，
///   使运行期绑定器能够复用编译期路径的全部状态；
/// - **关键逻辑 (How)**：`of::<C>()` 读取 `TypeId`、`type_name` 与指针宽度，一次性计算形态；
/// - **契约 (What)**：`Copy`、`Send`、`Sync`，可随意在线程间传递；
/// - **风险 (Trade-offs)**：`type_name` 不保证跨编译器版本稳定，因此它只用于命名，
///   不参与相等性判断。
#[derive(Clone, Copy)]
pub struct ContractDescriptor {
    type_id: TypeId,
    qualified: &'static str,
    shape: ContractShape,
}

impl ContractDescriptor {
    /// 以编译期类型参数构造描述符。
    pub fn of<C: ?Sized + 'static>() -> Self {
        let qualified = type_name::<C>();
        Self {
            type_id: TypeId::of::<C>(),
            qualified,
            shape: ContractShape::detect::<C>(qualified),
        }
    }

    /// 契约类型的 [`TypeId`]。
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// 契约的全限定名称（去掉 `dyn ` 前缀）。
    pub fn name(&self) -> &'static str {
        self.qualified
            .strip_prefix("dyn ")
            .unwrap_or(self.qualified)
    }

    /// 派生出的通道名称。
    ///
    /// 通道名与配置作用域名同源，调用方不得把该派生规则挪作他用。
    pub fn channel_name(&self) -> &'static str {
        self.name()
    }

    /// 契约形态。
    pub fn shape(&self) -> ContractShape {
        self.shape
    }

    /// 校验描述符是否为接口形态，否则返回 [`HttpApiError::InvalidContract`]。
    pub fn ensure_interface(&self) -> Result<()> {
        match self.shape {
            ContractShape::Interface => Ok(()),
            other => Err(HttpApiError::InvalidContract {
                contract: self.name().to_owned(),
                reason: format!("expected a trait object, found a {}", other.describe()),
            }),
        }
    }
}

impl PartialEq for ContractDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ContractDescriptor {}

impl Hash for ContractDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ContractDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractDescriptor")
            .field("name", &self.name())
            .field("shape", &self.shape)
            .finish()
    }
}

impl fmt::Display for ContractDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
