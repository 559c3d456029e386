//! CLI integration tests

use fin_test_helpers::prelude::*;
use predicates::prelude::*;

#[test]
fn test_finsync_help() {
    finsync_command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("offline-first"))
        .stdout(predicate::str::contains("--offline"));
}

#[test]
fn test_finsync_version() {
    finsync_command()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_init_creates_workspace() {
    let temp = temp_dir();

    finsync_command()
        .current_dir(temp.path())
        .arg("init")
        .assert()
        .success()
        .stderr(predicate::str::contains("Workspace initialized"));

    assert!(temp.path().join(".finsync/config.toml").exists());
    let gitignore = std::fs::read_to_string(temp.path().join(".gitignore")).unwrap();
    assert!(gitignore.contains(".finsync/*.db"));

    finsync_command()
        .current_dir(temp.path())
        .arg("init")
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_commands_require_workspace() {
    let temp = temp_dir();

    offline_command()
        .current_dir(temp.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("finsync init"));
}

#[test]
fn test_status_on_fresh_workspace() {
    let workspace = init_workspace();

    offline_command()
        .current_dir(workspace.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mode: offline"))
        .stdout(predicate::str::contains("Pending operations: 0"))
        .stdout(predicate::str::contains("Last sync: never"));
}

#[test]
fn test_offline_transaction_is_queued() {
    let workspace = init_workspace();

    offline_command()
        .current_dir(workspace.path())
        .args([
            "tx",
            "add",
            "--account",
            "acc-1",
            "--amount",
            "25,00",
            "--description",
            "Mercado",
            "--date",
            "2026-10-05",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued as"))
        .stdout(contains_temp_id())
        .stderr(predicate::str::contains("Sem conexão"));

    offline_command()
        .current_dir(workspace.path())
        .args(["queue", "--json"])
        .assert()
        .success()
        .stdout(json_array_len(1))
        .stdout(predicate::str::contains("\"type\": \"transaction\""));
}

#[test]
fn test_invalid_amount_is_rejected() {
    let workspace = init_workspace();

    offline_command()
        .current_dir(workspace.path())
        .args([
            "tx",
            "add",
            "--account",
            "acc-1",
            "--amount",
            "abc",
            "--description",
            "Mercado",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid amount"));

    offline_command()
        .current_dir(workspace.path())
        .args(["queue", "--json"])
        .assert()
        .success()
        .stdout(json_array_len(0));
}

#[test]
fn test_invalid_scope_is_rejected() {
    let workspace = init_workspace();

    offline_command()
        .current_dir(workspace.path())
        .args(["tx", "delete", "tx-1", "--scope", "everything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("current-and-remaining"));
}

#[test]
fn test_deleting_an_installment_needs_a_scope() {
    let workspace = init_workspace();

    let output = offline_command()
        .current_dir(workspace.path())
        .args([
            "tx",
            "add",
            "--account",
            "acc-1",
            "--amount",
            "300,00",
            "--description",
            "Geladeira",
            "--date",
            "2026-10-05",
            "--installments",
            "3",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let temp_id = stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("local id "))
        .unwrap()
        .to_string();

    offline_command()
        .current_dir(workspace.path())
        .args(["tx", "delete", &temp_id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("current-and-remaining"));

    offline_command()
        .current_dir(workspace.path())
        .args(["tx", "delete", &temp_id, "--scope", "all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued as"));

    offline_command()
        .current_dir(workspace.path())
        .args(["queue", "--json"])
        .assert()
        .success()
        .stdout(json_array_len(2));
}

#[test]
fn test_sync_refuses_offline_mode() {
    let workspace = init_workspace();

    offline_command()
        .current_dir(workspace.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("offline"));
}

#[test]
fn test_offline_import_of_accounts_then_transactions() {
    let workspace = init_workspace();
    let accounts = write_sheet(
        &workspace,
        "contas.csv",
        "nome;tipo;saldo\nCarteira;corrente;1.000,00\nReserva;poupança;0\n",
    );

    offline_command()
        .current_dir(workspace.path())
        .args(["import", "contas"])
        .arg(&accounts)
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 2 record(s)"));

    offline_command()
        .current_dir(workspace.path())
        .arg("accounts")
        .assert()
        .success()
        .stdout(predicate::str::contains("Carteira"))
        .stdout(contains_brl(100000));

    let transactions = write_sheet(
        &workspace,
        "transacoes.csv",
        "data;descrição;valor;tipo;conta\n\
         05/10/2026;Guardar;200,00;despesa;Carteira\n\
         05/10/2026;Guardar;200,00;receita;Reserva\n\
         06/10/2026;Padaria;12,50;despesa;Carteira\n\
         06/10/2026;Cinema;30,00;despesa;Conta Fantasma\n",
    );

    offline_command()
        .current_dir(workspace.path())
        .args(["import", "transactions"])
        .arg(&transactions)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 transfer(s)"))
        .stdout(predicate::str::contains("1 rejected row(s)"))
        .stderr(predicate::str::contains("row 5"));

    offline_command()
        .current_dir(workspace.path())
        .args(["queue", "--json"])
        .assert()
        .success()
        .stdout(json_array_len(3));
}

#[test]
fn test_offline_logout_keeps_queue() {
    let workspace = init_workspace();

    offline_command()
        .current_dir(workspace.path())
        .args([
            "tx",
            "add",
            "--account",
            "acc-1",
            "--amount",
            "10",
            "--description",
            "Café",
        ])
        .assert()
        .success();

    offline_command()
        .current_dir(workspace.path())
        .arg("logout")
        .assert()
        .success()
        .stderr(predicate::str::contains("Sessão encerrada"));

    offline_command()
        .current_dir(workspace.path())
        .arg("queue")
        .assert()
        .success()
        .stdout(predicate::str::contains("transaction"))
        .stdout(predicate::str::contains("logout"));
}

#[test]
fn test_failed_list_is_empty() {
    let workspace = init_workspace();

    offline_command()
        .current_dir(workspace.path())
        .arg("failed")
        .assert()
        .success()
        .stderr(predicate::str::contains("No failed operations"))
        .stderr(stderr_not_contains(&["panicked"]));
}
