//! ERC20 token contract bindings.
//!
//! Only the public read/write surface the session uses is declared here; the
//! token's internal accounting is never touched directly.

use alloy_sol_types::sol;

sol! {
    /// Public surface of the deployed session token.
    #[sol(rpc)]
    interface IERC20 {
        /// Emitted when tokens move between accounts
        event Transfer(
            address indexed from,
            address indexed to,
            uint256 value
        );

        /// Token display name
        function name() external view returns (string memory);

        /// Token ticker symbol
        function symbol() external view returns (string memory);

        /// Balance held by `account`
        function balanceOf(address account) external view returns (uint256);

        /// Amount `spender` may still move on behalf of `owner`
        function allowance(address owner, address spender) external view returns (uint256);

        /// Move `amount` from the caller to `recipient`
        function transfer(address recipient, uint256 amount) external returns (bool);

        /// Move `amount` from `sender` to `recipient`, consuming the caller's allowance
        function transferFrom(address sender, address recipient, uint256 amount) external returns (bool);

        /// Authorize `spender` to move up to `amount` of the caller's tokens
        function approve(address spender, uint256 amount) external returns (bool);
    }
}
