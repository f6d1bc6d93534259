//! Contract bindings for the lending pool and its satellites.
//!
//! Only the functions and events the sentinel reads are declared. Return
//! tuples decode into generated `xxxReturn` structs, so call sites name
//! every field instead of indexing positionally.

use alloy::sol;

sol! {
    /// Lending pool (v3 surface plus the v2 `Deposit` event).
    #[derive(Debug, PartialEq, Eq)]
    interface IPool {
        event Supply(
            address indexed reserve,
            address user,
            address indexed onBehalfOf,
            uint256 amount,
            uint16 indexed referralCode
        );
        event Deposit(
            address indexed reserve,
            address user,
            address indexed onBehalfOf,
            uint256 amount,
            uint16 indexed referral
        );
        event Withdraw(
            address indexed reserve,
            address indexed user,
            address indexed to,
            uint256 amount
        );
        event Borrow(
            address indexed reserve,
            address user,
            address indexed onBehalfOf,
            uint256 amount,
            uint8 interestRateMode,
            uint256 borrowRate,
            uint16 indexed referralCode
        );
        event Repay(
            address indexed reserve,
            address indexed user,
            address indexed repayer,
            uint256 amount,
            bool useATokens
        );
        event LiquidationCall(
            address indexed collateralAsset,
            address indexed debtAsset,
            address indexed user,
            uint256 debtToCover,
            uint256 liquidatedCollateralAmount,
            address liquidator,
            bool receiveAToken
        );
        event ReserveUsedAsCollateralEnabled(address indexed reserve, address indexed user);
        event ReserveUsedAsCollateralDisabled(address indexed reserve, address indexed user);
        event ReserveDataUpdated(
            address indexed reserve,
            uint256 liquidityRate,
            uint256 stableBorrowRate,
            uint256 variableBorrowRate,
            uint256 liquidityIndex,
            uint256 variableBorrowIndex
        );

        function getReservesList() external view returns (address[] memory reserves);
        function getConfiguration(address asset) external view returns (uint256 data);
        function getUserConfiguration(address user) external view returns (uint256 data);
        function getUserAccountData(address user)
            external
            view
            returns (
                uint256 totalCollateralBase,
                uint256 totalDebtBase,
                uint256 availableBorrowsBase,
                uint256 currentLiquidationThreshold,
                uint256 ltv,
                uint256 healthFactor
            );
        function liquidationCall(
            address collateralAsset,
            address debtAsset,
            address user,
            uint256 debtToCover,
            bool receiveAToken
        ) external;
    }
}

sol! {
    /// Protocol data provider. `stableRateLastUpdated` is a uint40 on chain
    /// and is widened here; it is ABI-identical in a return tuple.
    #[derive(Debug, PartialEq, Eq)]
    interface IPoolDataProvider {
        function getUserReserveData(address asset, address user)
            external
            view
            returns (
                uint256 currentATokenBalance,
                uint256 currentStableDebt,
                uint256 currentVariableDebt,
                uint256 principalStableDebt,
                uint256 scaledVariableDebt,
                uint256 stableBorrowRate,
                uint256 liquidityRate,
                uint256 stableRateLastUpdated,
                bool usageAsCollateralEnabled
            );
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IPriceOracle {
        function getAssetPrice(address asset) external view returns (uint256 price);
        function getSourceOfAsset(address asset) external view returns (address source);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IPoolAddressesProvider {
        function getPriceOracle() external view returns (address oracle);
    }
}

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IERC20Metadata {
        function symbol() external view returns (string memory value);
        function decimals() external view returns (uint8 value);
    }
}

sol! {
    /// Chainlink-style price aggregator.
    #[derive(Debug, PartialEq, Eq)]
    interface IAggregator {
        event AnswerUpdated(int256 indexed current, uint256 indexed roundId, uint256 updatedAt);
    }
}

sol! {
    /// Multicall helper. `aggregate` reverts as a whole if any inner call reverts.
    #[derive(Debug, PartialEq, Eq)]
    interface IMulticall {
        struct Call {
            address target;
            bytes callData;
        }

        function aggregate(Call[] calldata calls)
            external
            returns (uint256 blockNumber, bytes[] memory returnData);
    }
}

sol! {
    /// Liquidation executor deployed by the operator.
    #[derive(Debug, PartialEq, Eq)]
    interface ILiquidationExecutor {
        function liquidate(
            address collateralAsset,
            address debtAsset,
            address user,
            uint256 debtToCover,
            bool receiveAToken
        ) external;
    }
}
